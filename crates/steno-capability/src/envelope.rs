//! The capability result envelope.
//!
//! Every capability invocation resolves to an [`InvokeOutcome`]: a tagged
//! success-or-failure value that is stored verbatim in step records and run
//! logs. Callers branch on the tag instead of probing for the presence of an
//! `error` field.

use serde::{Deserialize, Serialize};

/// The outcome of a single capability invocation.
///
/// Serialized with an explicit `status` tag:
///
/// ```json
/// {"status": "ok", "value": {"sent": true}}
/// {"status": "err", "message": "smtp connect refused"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvokeOutcome {
    /// The capability completed; `value` is its output payload.
    Ok { value: serde_json::Value },
    /// The capability failed; `message` describes why.
    Err { message: String },
}

impl InvokeOutcome {
    /// Build a success outcome from any JSON-convertible value.
    pub fn ok(value: impl Into<serde_json::Value>) -> Self {
        Self::Ok {
            value: value.into(),
        }
    }

    /// Build a failure outcome from any displayable error.
    pub fn err(message: impl Into<String>) -> Self {
        Self::Err {
            message: message.into(),
        }
    }

    /// Whether this outcome is a success.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Whether this outcome is a failure.
    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err { .. })
    }

    /// The success payload, if any.
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Ok { value } => Some(value),
            Self::Err { .. } => None,
        }
    }

    /// The failure message, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::Err { message } => Some(message),
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
