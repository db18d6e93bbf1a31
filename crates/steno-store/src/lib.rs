//! Steno automation storage engine.
//!
//! Single-file SQLite persistence for the automation core:
//!
//! - **[`db`]** -- async [`Database`] handle (`spawn_blocking` over a WAL
//!   connection).
//! - **[`migration`]** -- versioned, transactional schema migrations.
//! - **[`workflow_store`]** -- workflow definitions and execution history.
//! - **[`task_store`]** -- scheduled tasks, dispatch bookkeeping, and the
//!   append-only run log.
//! - **[`error`]** -- [`StoreError`] via [`thiserror`].
//!
//! The approval gate issues its own SQL against [`Database`]; its table is
//! created here (migration v3) so the whole core shares one schema history.

pub mod db;
pub mod error;
pub mod migration;
pub mod task_store;
pub mod workflow_store;

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use task_store::{
    NewTask, RunStatus, ScheduleType, ScheduledTask, TaskRunLog, TaskStore, TaskType,
};
pub use workflow_store::{
    ExecutionStatus, StepRecord, StepSpec, StoredWorkflow, WorkflowExecution, WorkflowStore,
};
