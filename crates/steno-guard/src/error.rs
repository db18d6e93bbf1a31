//! Guard error types.

use thiserror::Error;

use crate::gate::ApprovalStatus;

/// Convenience alias for guard results.
pub type GuardResult<T> = Result<T, GuardError>;

/// Errors from command classification and the approval gate.
#[derive(Debug, Error)]
pub enum GuardError {
    /// Errors from the persistence layer.
    #[error("store error: {0}")]
    Store(#[from] steno_store::StoreError),

    /// A classifier rule that failed to compile.
    #[error("invalid classifier pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The command string is unusable (for example, empty).
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// The referenced approval request does not exist.
    #[error("approval request not found: {id}")]
    RequestNotFound { id: String },

    /// The request already left `pending`; resolution happens exactly once.
    #[error("approval request {id} already resolved to {status}")]
    AlreadyResolved { id: String, status: ApprovalStatus },
}
