//! Scheduling for Steno: recurrence math and due-task dispatch.
//!
//! ## Modules
//!
//! - [`recurrence`] -- Pure next-run calculation for the supported schedule
//!   families (once, interval, daily, weekly, monthly, reduced cron).
//! - [`dispatcher`] -- Finds due tasks and routes them to workflows or
//!   capabilities, keeping the run log and task bookkeeping.
//! - [`error`] -- Scheduler error types.

pub mod dispatcher;
pub mod error;
pub mod recurrence;

// Re-export the most commonly used types at the crate root.
pub use dispatcher::{DispatcherConfig, TaskDispatcher};
pub use error::{SchedulerError, SchedulerResult};
pub use recurrence::Recurrence;
