//! The automation core behind one handle.
//!
//! [`Automation::open`] wires the database, the stores, the workflow engine,
//! the task dispatcher, and the approval gate together and exposes their
//! operations as a single API surface. Callers bring their own
//! [`CapabilityRegistry`]; the core never reaches outside it.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use steno_capability::{CapabilityRegistry, InvokeOutcome};
use steno_engine::{EngineConfig, WorkflowEngine};
use steno_guard::{
    ApprovalGate, ClassifierBuilder, CommandApprovalRequest, GateDecision, SecurityLevel,
};
use steno_scheduler::{DispatcherConfig, Recurrence, TaskDispatcher};
use steno_store::{
    Database, NewTask, ScheduleType, ScheduledTask, StepSpec, StoredWorkflow, TaskRunLog,
    TaskStore, TaskType, WorkflowExecution, WorkflowStore,
};

use crate::config::{AutomationConfig, RuleAdditions};
use crate::error::AutomationResult;

/// One handle over the whole automation core.
pub struct Automation {
    workflows: WorkflowStore,
    tasks: TaskStore,
    engine: Arc<WorkflowEngine>,
    dispatcher: TaskDispatcher,
    gate: ApprovalGate,
    config: AutomationConfig,
}

impl Automation {
    /// Open the database, run migrations, and wire every component.
    pub async fn open(
        config: AutomationConfig,
        registry: Arc<dyn CapabilityRegistry>,
    ) -> AutomationResult<Self> {
        let db = Database::open_and_migrate(config.db_path.clone()).await?;

        let workflows = WorkflowStore::new(db.clone());
        let tasks = TaskStore::new(db.clone());

        let engine = Arc::new(WorkflowEngine::with_config(
            workflows.clone(),
            Arc::clone(&registry),
            EngineConfig {
                step_timeout: config.step_timeout(),
            },
        ));
        let dispatcher = TaskDispatcher::with_config(
            tasks.clone(),
            Arc::clone(&engine),
            Arc::clone(&registry),
            DispatcherConfig {
                invoke_timeout: config.invoke_timeout(),
            },
        );

        let mut builder = ClassifierBuilder::new();
        builder = extend_tier(builder, SecurityLevel::Dangerous, &config.rules.dangerous);
        builder = extend_tier(builder, SecurityLevel::Moderate, &config.rules.moderate);
        builder = extend_tier(builder, SecurityLevel::Safe, &config.rules.safe);
        let gate = ApprovalGate::new(db, builder.build()?);

        tracing::info!(db_path = %config.db_path.display(), "automation core opened");
        Ok(Self {
            workflows,
            tasks,
            engine,
            dispatcher,
            gate,
            config,
        })
    }

    /// The configuration this core was opened with.
    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    // ── workflows ────────────────────────────────────────────────────

    /// Create a workflow definition.
    pub async fn create_workflow(
        &self,
        name: &str,
        description: Option<&str>,
        steps: Vec<StepSpec>,
        triggers: Option<Value>,
    ) -> AutomationResult<StoredWorkflow> {
        Ok(self
            .workflows
            .create(name, description, steps, triggers)
            .await?)
    }

    /// Fetch one workflow, `None` if unknown.
    pub async fn get_workflow(&self, id: &str) -> AutomationResult<Option<StoredWorkflow>> {
        Ok(self.workflows.get(id).await?)
    }

    /// List workflows, most recently updated first.
    pub async fn list_workflows(
        &self,
        limit: i64,
        offset: i64,
    ) -> AutomationResult<Vec<StoredWorkflow>> {
        Ok(self.workflows.list(limit, offset).await?)
    }

    /// Replace a workflow's name, description, steps, and triggers.
    pub async fn update_workflow(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
        steps: Vec<StepSpec>,
        triggers: Option<Value>,
    ) -> AutomationResult<()> {
        Ok(self
            .workflows
            .update(id, name, description, steps, triggers)
            .await?)
    }

    /// Enable or disable a workflow for scheduled starts.
    pub async fn toggle_workflow(&self, id: &str, active: bool) -> AutomationResult<()> {
        Ok(self.workflows.set_active(id, active).await?)
    }

    /// Delete a workflow and its execution history.
    pub async fn delete_workflow(&self, id: &str) -> AutomationResult<()> {
        Ok(self.workflows.delete(id).await?)
    }

    /// Run a workflow now and return the finished execution record.
    pub async fn run_workflow(
        &self,
        id: &str,
        inputs: Option<Value>,
        triggered_by: &str,
    ) -> AutomationResult<WorkflowExecution> {
        Ok(self.engine.run(id, inputs, triggered_by).await?)
    }

    /// Fetch one execution record, `None` if unknown.
    pub async fn get_execution(&self, id: &str) -> AutomationResult<Option<WorkflowExecution>> {
        Ok(self.workflows.get_execution(id).await?)
    }

    /// List a workflow's executions, newest first.
    pub async fn list_executions(
        &self,
        workflow_id: &str,
        limit: i64,
    ) -> AutomationResult<Vec<WorkflowExecution>> {
        Ok(self.workflows.list_executions(workflow_id, limit).await?)
    }

    // ── scheduled tasks ──────────────────────────────────────────────

    /// Create a scheduled task.
    ///
    /// The schedule is validated and the first `next_run` computed here, so
    /// a task that reaches the store is always dispatchable.
    pub async fn create_task(
        &self,
        name: &str,
        task_type: TaskType,
        task_config: Value,
        schedule_type: ScheduleType,
        schedule_config: Value,
        max_runs: Option<i64>,
    ) -> AutomationResult<ScheduledTask> {
        let recurrence = Recurrence::parse(schedule_type, &schedule_config)?;
        let next_run = recurrence.next_run(None, Utc::now()).timestamp();

        let task = self
            .tasks
            .create(NewTask {
                name: name.to_string(),
                task_type,
                task_config,
                schedule_type,
                schedule_config,
                next_run,
                max_runs,
            })
            .await?;
        Ok(task)
    }

    /// Fetch one task, `None` if unknown.
    pub async fn get_task(&self, id: &str) -> AutomationResult<Option<ScheduledTask>> {
        Ok(self.tasks.get(id).await?)
    }

    /// List tasks with pagination.
    pub async fn list_tasks(
        &self,
        limit: i64,
        offset: i64,
    ) -> AutomationResult<Vec<ScheduledTask>> {
        Ok(self.tasks.list(limit, offset).await?)
    }

    /// Run a task now, regardless of its schedule.
    pub async fn run_task(&self, id: &str) -> AutomationResult<TaskRunLog> {
        Ok(self.dispatcher.run_task(id).await?)
    }

    /// Enable or disable a task.
    pub async fn toggle_task(&self, id: &str, active: bool) -> AutomationResult<()> {
        Ok(self.tasks.set_active(id, active).await?)
    }

    /// Delete a task and its run log.
    pub async fn delete_task(&self, id: &str) -> AutomationResult<()> {
        Ok(self.tasks.delete(id).await?)
    }

    /// List active tasks due within the configured look-ahead window.
    pub async fn due_tasks(&self) -> AutomationResult<Vec<ScheduledTask>> {
        Ok(self.dispatcher.due_tasks(self.config.dispatch_window()).await?)
    }

    /// Run everything due within the configured look-ahead window.
    pub async fn run_due_tasks(&self) -> AutomationResult<Vec<TaskRunLog>> {
        Ok(self
            .dispatcher
            .run_due_tasks(self.config.dispatch_window())
            .await?)
    }

    /// List a task's run log, newest first.
    pub async fn list_task_runs(
        &self,
        task_id: &str,
        limit: i64,
    ) -> AutomationResult<Vec<TaskRunLog>> {
        Ok(self.tasks.list_runs(task_id, limit).await?)
    }

    // ── command security ─────────────────────────────────────────────

    /// Classify a command without touching the approval queue.
    pub fn classify_command(&self, command: &str) -> SecurityLevel {
        self.gate.classify(command)
    }

    /// Classify a command and park it for approval when dangerous.
    pub async fn submit_command(&self, command: &str) -> AutomationResult<GateDecision> {
        Ok(self.gate.submit(command).await?)
    }

    /// Approve a pending request. Exactly-once.
    pub async fn approve_request(
        &self,
        id: &str,
        resolved_by: &str,
    ) -> AutomationResult<CommandApprovalRequest> {
        Ok(self.gate.approve(id, resolved_by).await?)
    }

    /// Deny a pending request. Exactly-once.
    pub async fn deny_request(
        &self,
        id: &str,
        resolved_by: &str,
    ) -> AutomationResult<CommandApprovalRequest> {
        Ok(self.gate.deny(id, resolved_by).await?)
    }

    /// List requests still waiting for a decision, oldest first.
    pub async fn list_pending_approvals(&self) -> AutomationResult<Vec<CommandApprovalRequest>> {
        Ok(self.gate.list_pending().await?)
    }

    /// Fetch one approval request, `None` if unknown.
    pub async fn get_approval(
        &self,
        id: &str,
    ) -> AutomationResult<Option<CommandApprovalRequest>> {
        Ok(self.gate.get(id).await?)
    }

    /// Record what happened after an approved command ran.
    pub async fn attach_command_outcome(
        &self,
        id: &str,
        outcome: &InvokeOutcome,
    ) -> AutomationResult<()> {
        Ok(self.gate.attach_outcome(id, outcome).await?)
    }
}

/// Feed one tier's configured additions into the builder.
fn extend_tier(
    mut builder: ClassifierBuilder,
    level: SecurityLevel,
    rules: &RuleAdditions,
) -> ClassifierBuilder {
    for phrase in &rules.phrases {
        builder = builder.phrase(level, phrase.as_str());
    }
    for pattern in &rules.patterns {
        builder = builder.pattern(level, pattern.as_str());
    }
    for program in &rules.programs {
        builder = builder.program(level, program.as_str());
    }
    builder
}
