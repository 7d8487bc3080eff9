use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

use crate::entity::repository_state::RepositoryState;
use crate::metrics::ErrorCode;

use super::claim::ClaimKind;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Database error from sea-orm.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// A claim statement failed; the row set may be contended.
    #[error("Failed to lock {kind} repository: {source}")]
    Locking {
        kind: ClaimKind,
        #[source]
        source: DbErr,
    },

    /// Repository not found.
    #[error("Repository not found: {context}")]
    NotFound { context: String },

    /// Invalid input data.
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl RegistryError {
    /// Create a NotFound error for a UUID lookup.
    pub fn not_found_by_id(id: Uuid) -> Self {
        Self::NotFound {
            context: format!("id={}", id),
        }
    }

    /// Create an InvalidInput error for a state a run may not end in.
    pub fn non_terminal_state(state: RepositoryState) -> Self {
        Self::InvalidInput {
            message: format!("'{}' is not a terminal repository state", state),
        }
    }

    /// Whether this error came from a claim attempt.
    pub fn is_locking(&self) -> bool {
        matches!(self, Self::Locking { .. })
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Locking { .. } => ErrorCode::Locking,
            Self::Database(_) | Self::NotFound { .. } => ErrorCode::Database,
            Self::InvalidInput { .. } => ErrorCode::Internal,
        }
    }
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
