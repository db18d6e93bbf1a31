//! Steno automation core: one handle over workflows, schedules, and the
//! command security gate.
//!
//! The heavy lifting lives in the component crates; this one wires them
//! together:
//!
//! - [`steno_store`] -- SQLite persistence for workflows, tasks, and runs.
//! - [`steno_engine`] -- sequential workflow execution with `{{ }}`
//!   placeholder resolution.
//! - [`steno_scheduler`] -- recurrence math and due-task dispatch.
//! - [`steno_guard`] -- command classification and the approval gate.
//!
//! [`Automation::open`] builds the whole stack from an [`AutomationConfig`]
//! and a caller-supplied capability registry.

use tracing_subscriber::EnvFilter;

pub mod config;
pub mod error;
pub mod service;

pub use config::{AutomationConfig, ClassifierRules, RuleAdditions};
pub use error::{AutomationError, AutomationResult};
pub use service::Automation;

// Re-export the component types that appear in facade signatures, so most
// callers need only this crate.
pub use steno_capability::{
    Capability, CapabilityHub, CapabilityRegistry, InvokeOutcome, NOTIFY_CAPABILITY,
    REPORT_CAPABILITY,
};
pub use steno_guard::{ApprovalStatus, CommandApprovalRequest, GateDecision, SecurityLevel};
pub use steno_store::{
    ExecutionStatus, RunStatus, ScheduleType, ScheduledTask, StepRecord, StepSpec, StoredWorkflow,
    TaskRunLog, TaskType, WorkflowExecution,
};

/// Initialize the tracing subscriber with the given default log level.
///
/// Call once at startup, before any other Steno API. `RUST_LOG` overrides
/// `default_level` when set.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
