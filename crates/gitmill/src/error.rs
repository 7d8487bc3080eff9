use thiserror::Error;

use crate::clone::CloneError;
use crate::commit::CommitError;
use crate::metrics::ErrorCode;
use crate::queue::QueueError;
use crate::registry::RegistryError;
use crate::vcs::CommandError;

/// Any failure while processing a repository.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Clone(#[from] CloneError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Registry(e) => e.error_code(),
            Error::Command(e) => e.error_code(),
            Error::Clone(e) => e.error_code(),
            Error::Commit(e) => e.error_code(),
            Error::Queue(e) => e.error_code(),
            Error::Internal(_) => ErrorCode::Internal,
        }
    }
}

/// Result type alias for crate-level operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn codes_come_from_the_wrapped_error() {
        let err: Error = CloneError::Io {
            path: PathBuf::from("/work"),
            source: std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full"),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::DiskSpace);

        let err: Error = QueueError::ShutDown.into();
        assert_eq!(err.code(), ErrorCode::Queue);

        assert_eq!(Error::internal("boom").code(), ErrorCode::Internal);
    }

    #[test]
    fn transparent_variants_keep_the_message() {
        let err: Error = QueueError::connection("refused").into();
        assert_eq!(err.to_string(), "broker connection failed: refused");
    }
}
