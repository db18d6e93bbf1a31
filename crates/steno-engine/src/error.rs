//! Error types for the steno-engine crate.

use steno_store::StoreError;
use thiserror::Error;

/// Alias for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while running workflows.
///
/// A failing *step* is not an error: the run completes with a `Failed`
/// execution record. These variants cover problems before or around the run
/// itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The underlying store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The requested workflow does not exist.
    #[error("workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    /// The caller passed inputs the engine cannot use.
    #[error("invalid workflow inputs: {0}")]
    InvalidInputs(String),
}
