//! Capability traits and the in-process registry.
//!
//! A [`Capability`] is one invokable action (send a notification, generate a
//! meeting report, post to a webhook). The automation core never calls
//! capabilities directly; it goes through a [`CapabilityRegistry`], which
//! resolves a name to an implementation and returns an [`InvokeOutcome`]
//! envelope even when the name is unknown.
//!
//! [`CapabilityHub`] is the standard in-process registry, backed by
//! [`DashMap`] so it can be shared across tasks without a global `RwLock`.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::envelope::InvokeOutcome;

/// Capability name invoked for notification tasks.
pub const NOTIFY_CAPABILITY: &str = "notify_send";

/// Capability name invoked for report-generation tasks.
pub const REPORT_CAPABILITY: &str = "report_generate";

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A single named, invokable action.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Machine-readable capability name (e.g. `notify_send`).
    fn name(&self) -> &str;

    /// Run the capability with the given JSON arguments.
    ///
    /// Implementations report failure through the envelope rather than
    /// panicking; a panic inside a capability is a bug in that capability.
    async fn invoke(&self, args: serde_json::Value) -> InvokeOutcome;
}

/// Name-based capability dispatch.
///
/// The workflow engine and task dispatcher depend on this trait, not on any
/// concrete registry, so embedders can bridge to their own process-external
/// capability hosts.
#[async_trait]
pub trait CapabilityRegistry: Send + Sync {
    /// Invoke `capability` with `args`.
    ///
    /// Total: an unknown capability name resolves to an `Err` envelope, not a
    /// Rust error.
    async fn invoke(&self, capability: &str, args: serde_json::Value) -> InvokeOutcome;

    /// Whether a capability with this name is registered.
    fn contains(&self, capability: &str) -> bool;

    /// Names of all registered capabilities.
    fn names(&self) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// CapabilityHub
// ---------------------------------------------------------------------------

/// Concurrent in-process registry backed by [`DashMap`].
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Clone)]
pub struct CapabilityHub {
    inner: Arc<DashMap<String, Arc<dyn Capability>>>,
}

impl CapabilityHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Register a capability under its own name.
    ///
    /// A capability with the same name is overwritten.
    pub fn register(&self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        tracing::info!(capability = %name, "capability registered");
        self.inner.insert(name, capability);
    }

    /// Remove a capability by name. Returns `true` if it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.inner.remove(name).is_some();
        if removed {
            tracing::info!(capability = %name, "capability unregistered");
        }
        removed
    }

    /// Number of registered capabilities.
    pub fn count(&self) -> usize {
        self.inner.len()
    }
}

impl Default for CapabilityHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityRegistry for CapabilityHub {
    async fn invoke(&self, capability: &str, args: serde_json::Value) -> InvokeOutcome {
        let found = self.inner.get(capability).map(|e| Arc::clone(e.value()));
        match found {
            Some(cap) => {
                tracing::debug!(capability = %capability, "invoking capability");
                cap.invoke(args).await
            }
            None => {
                tracing::warn!(capability = %capability, "unknown capability invoked");
                InvokeOutcome::err(format!("unknown capability: {capability}"))
            }
        }
    }

    fn contains(&self, capability: &str) -> bool {
        self.inner.contains_key(capability)
    }

    fn names(&self) -> Vec<String> {
        self.inner.iter().map(|e| e.key().clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Echoes its arguments back as the success payload.
    struct EchoCapability;

    #[async_trait]
    impl Capability for EchoCapability {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, args: serde_json::Value) -> InvokeOutcome {
            InvokeOutcome::ok(args)
        }
    }

    /// Always fails with a fixed message.
    struct FailCapability;

    #[async_trait]
    impl Capability for FailCapability {
        fn name(&self) -> &str {
            "always_fail"
        }

        async fn invoke(&self, _args: serde_json::Value) -> InvokeOutcome {
            InvokeOutcome::err("deliberate failure")
        }
    }

    #[tokio::test]
    async fn invoke_registered_capability() {
        let hub = CapabilityHub::new();
        hub.register(Arc::new(EchoCapability));

        let outcome = hub.invoke("echo", json!({"msg": "hi"})).await;
        assert_eq!(outcome, InvokeOutcome::ok(json!({"msg": "hi"})));
    }

    #[tokio::test]
    async fn unknown_capability_yields_err_envelope() {
        let hub = CapabilityHub::new();

        let outcome = hub.invoke("missing", json!({})).await;
        assert!(outcome.is_err());
        assert!(outcome.error().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn failure_is_reported_in_envelope() {
        let hub = CapabilityHub::new();
        hub.register(Arc::new(FailCapability));

        let outcome = hub.invoke("always_fail", json!({})).await;
        assert_eq!(outcome.error(), Some("deliberate failure"));
    }

    #[tokio::test]
    async fn register_unregister_and_count() {
        let hub = CapabilityHub::new();
        assert_eq!(hub.count(), 0);

        hub.register(Arc::new(EchoCapability));
        assert_eq!(hub.count(), 1);
        assert!(hub.contains("echo"));

        assert!(hub.unregister("echo"));
        assert!(!hub.contains("echo"));
        assert!(!hub.unregister("echo"));
    }

    #[tokio::test]
    async fn reregistering_overwrites() {
        struct EchoV2;

        #[async_trait]
        impl Capability for EchoV2 {
            fn name(&self) -> &str {
                "echo"
            }

            async fn invoke(&self, _args: serde_json::Value) -> InvokeOutcome {
                InvokeOutcome::ok(json!("v2"))
            }
        }

        let hub = CapabilityHub::new();
        hub.register(Arc::new(EchoCapability));
        hub.register(Arc::new(EchoV2));

        assert_eq!(hub.count(), 1);
        let outcome = hub.invoke("echo", json!({})).await;
        assert_eq!(outcome, InvokeOutcome::ok(json!("v2")));
    }
}
