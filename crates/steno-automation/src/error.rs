//! Facade error types.

use thiserror::Error;

/// Convenience alias for automation results.
pub type AutomationResult<T> = Result<T, AutomationError>;

/// Errors surfaced by the automation facade.
///
/// Mostly a funnel: the facade adds no failure modes of its own beyond
/// loading its configuration file, so each variant wraps one layer's error.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// Errors from the persistence layer.
    #[error("store error: {0}")]
    Store(#[from] steno_store::StoreError),

    /// Errors from the workflow engine.
    #[error("engine error: {0}")]
    Engine(#[from] steno_engine::EngineError),

    /// Errors from schedule parsing or task dispatch.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] steno_scheduler::SchedulerError),

    /// Errors from command classification or the approval gate.
    #[error("guard error: {0}")]
    Guard(#[from] steno_guard::GuardError),

    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid TOML.
    #[error("failed to parse config file: {0}")]
    Config(#[from] toml::de::Error),
}
