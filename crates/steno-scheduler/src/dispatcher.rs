//! Due-task dispatch.
//!
//! The dispatcher owns no timer. Callers decide cadence: poll
//! [`TaskDispatcher::due_tasks`] to see what is due, or call
//! [`TaskDispatcher::run_due_tasks`] for one sweep. Exactly one dispatcher
//! should run against a given store; nothing here locks tasks against a
//! second concurrent sweeper.
//!
//! Bookkeeping is asymmetric on purpose. A successful run advances
//! `last_run`/`next_run`, bumps `run_count` and may deactivate the task
//! (`max_runs` reached, or a one-shot that fired). A failed run writes only
//! the run log: the task keeps its stale `next_run`, so the next sweep
//! retries it, and failures never burn down `max_runs`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use steno_capability::{CapabilityRegistry, InvokeOutcome, NOTIFY_CAPABILITY, REPORT_CAPABILITY};
use steno_engine::WorkflowEngine;
use steno_store::{ExecutionStatus, ScheduledTask, StoreError, TaskRunLog, TaskStore, TaskType};

use crate::error::{SchedulerError, SchedulerResult};
use crate::recurrence::Recurrence;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tunable limits for task dispatch.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Hard ceiling on a direct capability invocation (capability,
    /// notification and report tasks). Workflow tasks are bounded per step
    /// by the engine instead.
    pub invoke_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            invoke_timeout: Duration::from_secs(60),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Finds due tasks and runs them.
pub struct TaskDispatcher {
    tasks: TaskStore,
    engine: Arc<WorkflowEngine>,
    registry: Arc<dyn CapabilityRegistry>,
    config: DispatcherConfig,
}

impl TaskDispatcher {
    /// Create a dispatcher with default limits.
    pub fn new(
        tasks: TaskStore,
        engine: Arc<WorkflowEngine>,
        registry: Arc<dyn CapabilityRegistry>,
    ) -> Self {
        Self::with_config(tasks, engine, registry, DispatcherConfig::default())
    }

    /// Create a dispatcher with explicit limits.
    pub fn with_config(
        tasks: TaskStore,
        engine: Arc<WorkflowEngine>,
        registry: Arc<dyn CapabilityRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            tasks,
            engine,
            registry,
            config,
        }
    }

    /// List active tasks due within the look-ahead window. Read-only.
    pub async fn due_tasks(&self, within: chrono::Duration) -> SchedulerResult<Vec<ScheduledTask>> {
        let cutoff = (Utc::now() + within).timestamp();
        Ok(self.tasks.list_due(cutoff).await?)
    }

    /// Run one task now, regardless of its `next_run`.
    ///
    /// Returns the finished run log row. The task's action failing is not an
    /// `Err`: it comes back as a [`TaskRunLog`] with failed status, and the
    /// task's own bookkeeping stays untouched.
    pub async fn run_task(&self, task_id: &str) -> SchedulerResult<TaskRunLog> {
        let task = self.tasks.get(task_id).await?.ok_or_else(|| {
            SchedulerError::TaskNotFound {
                task_id: task_id.to_string(),
            }
        })?;
        // Parse up front: a schedule that cannot be parsed would leave the
        // bookkeeping unwritable after the action already ran.
        let recurrence = Recurrence::parse(task.schedule_type, &task.schedule_config)?;

        let run = self.tasks.insert_run(&task.id).await?;
        tracing::info!(
            task_id = %task.id,
            run_id = %run.id,
            task_type = %task.task_type,
            "task dispatch started"
        );

        match self.execute(&task).await {
            InvokeOutcome::Ok { value } => {
                self.tasks.complete_run(&run.id, Some(&value)).await?;
                let now = Utc::now();
                let next_run = recurrence.next_run(Some(now), now);
                // A schedule that no longer advances (a one-shot that fired)
                // is spent; leaving it active would redispatch it forever.
                let spent = next_run <= now;
                let max_reached = task.max_runs.is_some_and(|max| task.run_count + 1 >= max);
                self.tasks
                    .record_run(
                        &task.id,
                        now.timestamp(),
                        next_run.timestamp(),
                        spent || max_reached,
                    )
                    .await?;
                tracing::info!(
                    task_id = %task.id,
                    run_id = %run.id,
                    next_run = next_run.timestamp(),
                    deactivated = spent || max_reached,
                    "task dispatch completed"
                );
            }
            InvokeOutcome::Err { message } => {
                self.tasks.fail_run(&run.id, &message).await?;
                tracing::warn!(
                    task_id = %task.id,
                    run_id = %run.id,
                    error = %message,
                    "task dispatch failed"
                );
            }
        }

        self.tasks.get_run(&run.id).await?.ok_or_else(|| {
            SchedulerError::Store(StoreError::NotFound {
                entity: "task run",
                id: run.id.clone(),
            })
        })
    }

    /// Run every task due within the window, in `next_run` order.
    ///
    /// One task's problems never abort the sweep: action failures come back
    /// as failed run logs, and dispatch errors are logged and skipped.
    pub async fn run_due_tasks(&self, within: chrono::Duration) -> SchedulerResult<Vec<TaskRunLog>> {
        let due = self.due_tasks(within).await?;
        if due.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(count = due.len(), "dispatching due tasks");

        let mut runs = Vec::with_capacity(due.len());
        for task in due {
            match self.run_task(&task.id).await {
                Ok(run) => runs.push(run),
                Err(e) => {
                    tracing::error!(task_id = %task.id, error = %e, "task dispatch error")
                }
            }
        }
        Ok(runs)
    }

    /// Route one task to its action and normalize the result.
    async fn execute(&self, task: &ScheduledTask) -> InvokeOutcome {
        match task.task_type {
            TaskType::Workflow => self.run_workflow_task(task).await,
            TaskType::Capability => {
                match task.task_config.get("capability").and_then(Value::as_str) {
                    Some(capability) => {
                        let args = task.task_config.get("args").cloned().unwrap_or(Value::Null);
                        self.invoke(capability, args).await
                    }
                    None => InvokeOutcome::err("task config is missing `capability`"),
                }
            }
            TaskType::Notification => {
                self.invoke(NOTIFY_CAPABILITY, task.task_config.clone()).await
            }
            TaskType::Report => self.invoke(REPORT_CAPABILITY, task.task_config.clone()).await,
        }
    }

    async fn run_workflow_task(&self, task: &ScheduledTask) -> InvokeOutcome {
        let Some(workflow_id) = task.task_config.get("workflow_id").and_then(Value::as_str)
        else {
            return InvokeOutcome::err("task config is missing `workflow_id`");
        };
        let inputs = task.task_config.get("inputs").cloned();
        let triggered_by = format!("schedule:{}", task.id);

        match self.engine.run(workflow_id, inputs, &triggered_by).await {
            Ok(execution) if execution.status == ExecutionStatus::Completed => {
                InvokeOutcome::ok(json!({
                    "execution_id": execution.id,
                    "status": "completed",
                }))
            }
            Ok(execution) => InvokeOutcome::err(execution.error.unwrap_or_else(|| {
                format!("workflow execution {} did not complete", execution.id)
            })),
            Err(e) => InvokeOutcome::err(e.to_string()),
        }
    }

    /// Invoke one capability under the configured timeout.
    async fn invoke(&self, capability: &str, args: Value) -> InvokeOutcome {
        let call = self.registry.invoke(capability, args);
        match tokio::time::timeout(self.config.invoke_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => {
                InvokeOutcome::err(format!("timed out after {:?}", self.config.invoke_timeout))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
