//! Command security for Steno automations.
//!
//! Two layers: a [`CommandClassifier`] that sorts shell commands into
//! [`SecurityLevel`] tiers (dangerous rules win over moderate, moderate over
//! safe, and anything unmatched is dangerous), and an [`ApprovalGate`] that
//! parks dangerous commands as persisted approval requests until a human
//! approves or denies them.
//!
//! Neither layer executes commands. The gate records decisions and, after
//! the caller has run an approved command, the execution outcome.

pub mod classifier;
pub mod error;
pub mod gate;

pub use classifier::{ClassifierBuilder, CommandClassifier, SecurityLevel};
pub use error::{GuardError, GuardResult};
pub use gate::{ApprovalGate, ApprovalStatus, CommandApprovalRequest, GateDecision};
