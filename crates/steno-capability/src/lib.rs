//! Capability contract for the Steno automation core.
//!
//! Workflows, scheduled tasks, and approved commands all bottom out in
//! capability invocations. This crate defines that seam:
//!
//! - **[`envelope`]** -- [`InvokeOutcome`], the tagged ok/err result every
//!   invocation produces and every store persists.
//! - **[`registry`]** -- the [`Capability`] / [`CapabilityRegistry`] traits
//!   and [`CapabilityHub`], a [`dashmap`]-backed in-process registry.
//!
//! All public types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod envelope;
pub mod registry;

pub use envelope::InvokeOutcome;
pub use registry::{
    Capability, CapabilityHub, CapabilityRegistry, NOTIFY_CAPABILITY, REPORT_CAPABILITY,
};
