use thiserror::Error;

use crate::metrics::ErrorCode;

/// Errors raised while talking to the message broker.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Could not open or re-open a broker connection.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// The broker rejected or never acknowledged a message.
    #[error("failed to publish message {key}: {message}")]
    Publish { key: String, message: String },

    #[error("failed to encode message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("queue service is shut down")]
    ShutDown,
}

impl QueueError {
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    #[inline]
    pub fn publish(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            QueueError::Serialization(_) => ErrorCode::Internal,
            _ => ErrorCode::Queue,
        }
    }
}

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
