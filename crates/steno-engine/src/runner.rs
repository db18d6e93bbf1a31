//! Sequential workflow execution.
//!
//! A run is persisted before the first step fires: the engine inserts a
//! `running` execution row, then walks the steps in order, resolving each
//! step's parameter placeholders against the inputs and earlier step records
//! and re-persisting the accumulated records after every step. A crash
//! mid-run therefore leaves an inspectable partial record rather than
//! nothing.
//!
//! Step failures are data, not errors: a failing step yields an Err outcome
//! in its record, and whether the run keeps going is the step's own
//! `stop_on_error` choice. [`WorkflowEngine::run`] returns `Err` only for
//! infrastructure problems (unknown workflow, bad inputs, storage).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use steno_capability::{CapabilityRegistry, InvokeOutcome};
use steno_store::{ExecutionStatus, StepRecord, StoreError, WorkflowExecution, WorkflowStore};

use crate::error::{EngineError, EngineResult};
use crate::template::{resolve, ResolveContext};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable limits for workflow execution.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard ceiling on a single capability call. A step that exceeds it is
    /// recorded as failed with a timeout message.
    pub step_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Executes stored workflows against a capability registry.
pub struct WorkflowEngine {
    store: WorkflowStore,
    registry: Arc<dyn CapabilityRegistry>,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Create an engine with default limits.
    pub fn new(store: WorkflowStore, registry: Arc<dyn CapabilityRegistry>) -> Self {
        Self::with_config(store, registry, EngineConfig::default())
    }

    /// Create an engine with explicit limits.
    pub fn with_config(
        store: WorkflowStore,
        registry: Arc<dyn CapabilityRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Run a workflow to completion and return its persisted execution.
    ///
    /// # Arguments
    ///
    /// * `workflow_id` -- The stored workflow to run.
    /// * `inputs` -- Optional JSON object bound under the `input.` placeholder
    ///   root. `None` and `null` mean no inputs; any other non-object value
    ///   is rejected before an execution row is created.
    /// * `triggered_by` -- Free-form origin marker recorded on the execution
    ///   (e.g. `"manual"` or `"schedule:<task id>"`).
    ///
    /// An inactive workflow still runs here: the active flag gates scheduled
    /// dispatch, not explicit invocation.
    pub async fn run(
        &self,
        workflow_id: &str,
        inputs: Option<Value>,
        triggered_by: &str,
    ) -> EngineResult<WorkflowExecution> {
        let workflow = self.store.get(workflow_id).await?.ok_or_else(|| {
            EngineError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            }
        })?;

        let input = match inputs {
            None | Some(Value::Null) => serde_json::Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(EngineError::InvalidInputs(format!(
                    "workflow inputs must be a JSON object, got {other}"
                )));
            }
        };

        let execution = self
            .store
            .create_execution(&workflow.id, triggered_by)
            .await?;
        tracing::info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            steps = workflow.steps.len(),
            triggered_by,
            "workflow run started"
        );

        let mut records: Vec<StepRecord> = Vec::with_capacity(workflow.steps.len());
        let mut failure: Option<String> = None;

        for (index, step) in workflow.steps.iter().enumerate() {
            let ctx = ResolveContext::new(&input, &records);
            let resolved = resolve(&step.params, &ctx);

            let outcome = self.invoke_step(&step.capability, resolved.clone()).await;
            let error = outcome.error().map(str::to_string);
            records.push(StepRecord {
                step_index: index,
                capability: step.capability.clone(),
                resolved_params: resolved,
                outcome,
            });
            self.store
                .update_step_results(&execution.id, &records)
                .await?;

            if let Some(message) = error {
                tracing::warn!(
                    execution_id = %execution.id,
                    step_index = index,
                    capability = %step.capability,
                    error = %message,
                    stop_on_error = step.stop_on_error,
                    "step failed"
                );
                if step.stop_on_error {
                    failure = Some(message);
                    break;
                }
            }
        }

        let (status, error) = match failure {
            Some(message) => (ExecutionStatus::Failed, Some(message)),
            None => (ExecutionStatus::Completed, None),
        };
        self.store
            .finish_execution(&execution.id, status, error.as_deref())
            .await?;
        tracing::info!(
            execution_id = %execution.id,
            status = %status,
            "workflow run finished"
        );

        self.store.get_execution(&execution.id).await?.ok_or_else(|| {
            EngineError::Store(StoreError::NotFound {
                entity: "execution",
                id: execution.id.clone(),
            })
        })
    }

    /// Invoke one capability under the configured timeout.
    async fn invoke_step(&self, capability: &str, args: Value) -> InvokeOutcome {
        let call = self.registry.invoke(capability, args);
        match tokio::time::timeout(self.config.step_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                InvokeOutcome::err(format!("timed out after {:?}", self.config.step_timeout))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use steno_capability::{Capability, CapabilityHub};
    use steno_store::{Database, StepSpec};

    struct EchoCapability;

    #[async_trait]
    impl Capability for EchoCapability {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, args: Value) -> InvokeOutcome {
            InvokeOutcome::ok(json!({ "echoed": args }))
        }
    }

    struct FailCapability;

    #[async_trait]
    impl Capability for FailCapability {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn invoke(&self, _args: Value) -> InvokeOutcome {
            InvokeOutcome::err("simulated failure")
        }
    }

    struct SlowCapability;

    #[async_trait]
    impl Capability for SlowCapability {
        fn name(&self) -> &str {
            "slow"
        }

        async fn invoke(&self, _args: Value) -> InvokeOutcome {
            tokio::time::sleep(Duration::from_millis(200)).await;
            InvokeOutcome::ok(json!("too late"))
        }
    }

    async fn setup() -> (WorkflowStore, Arc<CapabilityHub>) {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let hub = Arc::new(CapabilityHub::new());
        hub.register(Arc::new(EchoCapability));
        hub.register(Arc::new(FailCapability));
        hub.register(Arc::new(SlowCapability));
        (WorkflowStore::new(db), hub)
    }

    fn step(capability: &str, params: Value, stop_on_error: bool) -> StepSpec {
        StepSpec {
            capability: capability.to_string(),
            params,
            stop_on_error,
        }
    }

    #[tokio::test]
    async fn run_two_step_echo_chain() {
        let (store, hub) = setup().await;
        let engine = WorkflowEngine::new(store.clone(), hub);

        let workflow = store
            .create(
                "chain",
                None,
                vec![
                    step("echo", json!({"message": "{{input.greeting}}"}), true),
                    step(
                        "echo",
                        json!({"message": "{{steps[0].result.echoed.message}}"}),
                        true,
                    ),
                ],
                None,
            )
            .await
            .unwrap();

        let execution = engine
            .run(&workflow.id, Some(json!({"greeting": "hello"})), "manual")
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.error.is_none());
        assert!(execution.completed_at.is_some());
        assert_eq!(execution.step_results.len(), 2);
        assert_eq!(
            execution.step_results[0].resolved_params,
            json!({"message": "hello"})
        );
        // Step 1 received step 0's output through the placeholder.
        assert_eq!(
            execution.step_results[1].resolved_params,
            json!({"message": "hello"})
        );
        assert!(execution.step_results[1].outcome.is_ok());
    }

    #[tokio::test]
    async fn run_missing_workflow() {
        let (store, hub) = setup().await;
        let engine = WorkflowEngine::new(store, hub);

        let err = engine.run("no-such-id", None, "manual").await.unwrap_err();
        assert!(matches!(err, EngineError::WorkflowNotFound { .. }));
    }

    #[tokio::test]
    async fn failed_step_stops_run() {
        let (store, hub) = setup().await;
        let engine = WorkflowEngine::new(store.clone(), hub);

        let workflow = store
            .create(
                "stops",
                None,
                vec![
                    step("flaky", json!({}), true),
                    step("echo", json!({"message": "unreached"}), true),
                ],
                None,
            )
            .await
            .unwrap();

        let execution = engine.run(&workflow.id, None, "manual").await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("simulated failure"));
        assert_eq!(execution.step_results.len(), 1);

        // The persisted row agrees with what the engine returned.
        let fetched = store.get_execution(&execution.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Failed);
        assert_eq!(fetched.step_results.len(), 1);
    }

    #[tokio::test]
    async fn tolerated_failure_continues() {
        let (store, hub) = setup().await;
        let engine = WorkflowEngine::new(store.clone(), hub);

        let workflow = store
            .create(
                "tolerant",
                None,
                vec![
                    step("flaky", json!({}), false),
                    step("echo", json!({"message": "still ran"}), true),
                ],
                None,
            )
            .await
            .unwrap();

        let execution = engine.run(&workflow.id, None, "manual").await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.error.is_none());
        assert_eq!(execution.step_results.len(), 2);
        assert!(execution.step_results[0].outcome.is_err());
        assert!(execution.step_results[1].outcome.is_ok());
    }

    #[tokio::test]
    async fn step_timeout_records_err() {
        let (store, hub) = setup().await;
        let config = EngineConfig {
            step_timeout: Duration::from_millis(50),
        };
        let engine = WorkflowEngine::with_config(store.clone(), hub, config);

        let workflow = store
            .create("slow", None, vec![step("slow", json!({}), true)], None)
            .await
            .unwrap();

        let execution = engine.run(&workflow.id, None, "manual").await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        let message = execution.error.as_deref().unwrap();
        assert!(message.contains("timed out"), "got: {message}");
    }

    #[tokio::test]
    async fn inactive_workflow_still_runs_manually() {
        let (store, hub) = setup().await;
        let engine = WorkflowEngine::new(store.clone(), hub);

        let workflow = store
            .create(
                "paused",
                None,
                vec![step("echo", json!({"message": "hi"}), true)],
                None,
            )
            .await
            .unwrap();
        store.set_active(&workflow.id, false).await.unwrap();

        let execution = engine.run(&workflow.id, None, "manual").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn non_object_inputs_rejected() {
        let (store, hub) = setup().await;
        let engine = WorkflowEngine::new(store.clone(), hub);

        let workflow = store
            .create(
                "strict",
                None,
                vec![step("echo", json!({"message": "hi"}), true)],
                None,
            )
            .await
            .unwrap();

        let err = engine
            .run(&workflow.id, Some(json!([1, 2])), "manual")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInputs(_)));

        // Rejection happens before any execution row is created.
        let executions = store.list_executions(&workflow.id, 10).await.unwrap();
        assert!(executions.is_empty());
    }

    #[tokio::test]
    async fn unknown_capability_fails_the_step() {
        let (store, hub) = setup().await;
        let engine = WorkflowEngine::new(store.clone(), hub);

        let workflow = store
            .create(
                "missing-cap",
                None,
                vec![step("does_not_exist", json!({}), true)],
                None,
            )
            .await
            .unwrap();

        let execution = engine.run(&workflow.id, None, "manual").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution
            .error
            .as_deref()
            .unwrap()
            .contains("unknown capability"));
    }
}
