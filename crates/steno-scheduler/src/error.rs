//! Scheduler error types.

use thiserror::Error;

/// Convenience alias for scheduler results.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Errors from schedule parsing and task dispatch.
///
/// A task whose underlying action fails is not an error here: the dispatch
/// is recorded as a failed [`steno_store::TaskRunLog`] and the sweep goes on.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Errors from the persistence layer.
    #[error("store error: {0}")]
    Store(#[from] steno_store::StoreError),

    /// Errors from running a workflow-type task.
    #[error("engine error: {0}")]
    Engine(#[from] steno_engine::EngineError),

    /// The schedule configuration does not match its schedule type.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A cron expression outside the supported `M H * * *` subset.
    #[error("unsupported cron expression: {0}")]
    UnsupportedCron(String),

    /// The referenced scheduled task does not exist.
    #[error("scheduled task not found: {task_id}")]
    TaskNotFound { task_id: String },
}
