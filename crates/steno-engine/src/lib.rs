//! Workflow engine for Steno.
//!
//! Workflows are ordered lists of capability calls. The engine executes them
//! sequentially, resolving `{{ }}` placeholders in each step's parameters
//! against the workflow inputs and earlier step results, and persisting the
//! execution record as it grows.
//!
//! ## Modules
//!
//! - [`runner`] -- Sequential step execution with per-step timeouts.
//! - [`template`] -- Typed placeholder paths and best-effort resolution.
//! - [`error`] -- Engine error types.

pub mod error;
pub mod runner;
pub mod template;

// Re-export the most commonly used types at the crate root.
pub use error::{EngineError, EngineResult};
pub use runner::{EngineConfig, WorkflowEngine};
pub use template::{PathSegment, Resolution, ResolveContext, parse_path, resolve};
