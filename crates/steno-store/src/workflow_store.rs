//! Workflow persistence.
//!
//! SQLite-backed CRUD for workflow definitions plus the execution history
//! that the engine appends to while a run is in flight. Step definitions and
//! step results are stored as JSON columns; the execution row is created
//! `running` and flipped to a terminal status exactly once.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use steno_capability::InvokeOutcome;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// One step of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Capability to invoke for this step.
    pub capability: String,
    /// Invocation parameters. String leaves may contain `{{ }}` placeholders
    /// resolved against workflow inputs and earlier step outcomes.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Abort the run when this step fails.
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,
}

fn default_stop_on_error() -> bool {
    true
}

/// A persisted workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredWorkflow {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional description of what the workflow does.
    pub description: Option<String>,
    /// Ordered step definitions; position is execution order.
    pub steps: Vec<StepSpec>,
    /// Optional trigger metadata recorded by the caller. The automation core
    /// stores it verbatim and never interprets it.
    pub triggers: Option<serde_json::Value>,
    /// Whether schedules and triggers may start this workflow.
    pub is_active: bool,
    /// Unix timestamp when the workflow was created.
    pub created_at: i64,
    /// Unix timestamp when the workflow was last updated.
    pub updated_at: i64,
}

/// Lifecycle status of a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created but not yet picked up by the engine.
    Pending,
    /// The engine is working through the steps.
    Running,
    /// Every step ran and succeeded (or failures were tolerated).
    Completed,
    /// A step failed with `stop_on_error` set.
    Failed,
}

impl ExecutionStatus {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal statuses are never updated again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one executed step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Zero-based position of the step in the workflow.
    pub step_index: usize,
    /// Capability that was invoked.
    pub capability: String,
    /// Parameters after placeholder resolution.
    pub resolved_params: serde_json::Value,
    /// What the invocation produced.
    pub outcome: InvokeOutcome,
}

/// A single run of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// The workflow this run belongs to.
    pub workflow_id: String,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// Unix timestamp when the run started.
    pub started_at: i64,
    /// Unix timestamp when the run reached a terminal status.
    pub completed_at: Option<i64>,
    /// Records for the steps executed so far, in step order.
    pub step_results: Vec<StepRecord>,
    /// Error message of the step that failed the run, if any.
    pub error: Option<String>,
    /// Who or what started the run (e.g. `manual`, `schedule:<task id>`).
    pub triggered_by: String,
}

// ═══════════════════════════════════════════════════════════════════════
//  WorkflowStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD operations on workflow definitions and their execution history.
#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

impl WorkflowStore {
    /// Create a new workflow store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new workflow and return the stored record.
    ///
    /// Generates a UUID v7 identifier and sets both timestamps to now.
    /// Rejects empty step lists and steps with blank capability names.
    #[instrument(skip(self, steps, triggers))]
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        steps: Vec<StepSpec>,
        triggers: Option<serde_json::Value>,
    ) -> StoreResult<StoredWorkflow> {
        if steps.is_empty() {
            return Err(StoreError::InvalidArgument(
                "workflow must have at least one step".to_string(),
            ));
        }
        if let Some(pos) = steps.iter().position(|s| s.capability.trim().is_empty()) {
            return Err(StoreError::InvalidArgument(format!(
                "step {pos} has an empty capability name"
            )));
        }

        let id = Uuid::now_v7().to_string();
        let name = name.to_string();
        let description = description.map(|s| s.to_string());
        let now = Utc::now().timestamp();

        let steps_json = serde_json::to_string(&steps)?;
        let triggers_json = triggers.as_ref().map(serde_json::to_string).transpose()?;

        let workflow = StoredWorkflow {
            id: id.clone(),
            name: name.clone(),
            description: description.clone(),
            steps,
            triggers,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO workflows (id, name, description, steps, triggers, is_active, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
                    rusqlite::params![id, name, description, steps_json, triggers_json, now],
                )?;
                Ok(())
            })
            .await?;

        debug!(workflow_id = %workflow.id, workflow_name = %workflow.name, "workflow created");
        Ok(workflow)
    }

    /// Fetch a single workflow by ID, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredWorkflow>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, name, description, steps, triggers, is_active, created_at, updated_at \
                     FROM workflows WHERE id = ?1",
                    rusqlite::params![id],
                    map_workflow_row,
                );
                match result {
                    Ok(row) => row.into_stored_workflow().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List workflows ordered by most recently updated, with pagination.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<StoredWorkflow>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, description, steps, triggers, is_active, created_at, updated_at \
                     FROM workflows ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![limit, offset], map_workflow_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|r| r.into_stored_workflow())
                    .collect()
            })
            .await
    }

    /// Replace a workflow's name, description, steps, and triggers.
    ///
    /// Updates the `updated_at` timestamp automatically.
    #[instrument(skip(self, steps, triggers))]
    pub async fn update(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
        steps: Vec<StepSpec>,
        triggers: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        if steps.is_empty() {
            return Err(StoreError::InvalidArgument(
                "workflow must have at least one step".to_string(),
            ));
        }

        let id = id.to_string();
        let name = name.to_string();
        let description = description.map(|s| s.to_string());
        let now = Utc::now().timestamp();

        let steps_json = serde_json::to_string(&steps)?;
        let triggers_json = triggers.as_ref().map(serde_json::to_string).transpose()?;

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE workflows SET name = ?2, description = ?3, steps = ?4, triggers = ?5, updated_at = ?6 \
                     WHERE id = ?1",
                    rusqlite::params![id, name, description, steps_json, triggers_json, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Toggle a workflow's active state.
    #[instrument(skip(self))]
    pub async fn set_active(&self, id: &str, active: bool) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE workflows SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, active, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Delete a workflow by ID. Execution rows cascade.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM workflows WHERE id = ?1", rusqlite::params![id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Return the total number of workflows.
    #[instrument(skip(self))]
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM workflows", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
    }

    // ── executions ───────────────────────────────────────────────────

    /// Insert a new execution row in the `running` state.
    ///
    /// Called by the engine before the first step so a crash mid-run leaves
    /// an inspectable row behind.
    #[instrument(skip(self))]
    pub async fn create_execution(
        &self,
        workflow_id: &str,
        triggered_by: &str,
    ) -> StoreResult<WorkflowExecution> {
        let id = Uuid::now_v7().to_string();
        let workflow_id = workflow_id.to_string();
        let triggered_by = triggered_by.to_string();
        let now = Utc::now().timestamp();

        let execution = WorkflowExecution {
            id: id.clone(),
            workflow_id: workflow_id.clone(),
            status: ExecutionStatus::Running,
            started_at: now,
            completed_at: None,
            step_results: Vec::new(),
            error: None,
            triggered_by: triggered_by.clone(),
        };

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO workflow_executions (id, workflow_id, status, started_at, step_results, triggered_by) \
                     VALUES (?1, ?2, 'running', ?3, '[]', ?4)",
                    rusqlite::params![id, workflow_id, now, triggered_by],
                )?;
                Ok(())
            })
            .await?;

        debug!(execution_id = %execution.id, workflow_id = %execution.workflow_id, "execution created");
        Ok(execution)
    }

    /// Persist the step records accumulated so far for a running execution.
    #[instrument(skip(self, step_results))]
    pub async fn update_step_results(
        &self,
        execution_id: &str,
        step_results: &[StepRecord],
    ) -> StoreResult<()> {
        let execution_id = execution_id.to_string();
        let results_json = serde_json::to_string(step_results)?;

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE workflow_executions SET step_results = ?2 WHERE id = ?1",
                    rusqlite::params![execution_id, results_json],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "execution",
                        id: execution_id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Move an execution to a terminal status and stamp `completed_at`.
    #[instrument(skip(self))]
    pub async fn finish_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let execution_id = execution_id.to_string();
        let error = error.map(|s| s.to_string());
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE workflow_executions SET status = ?2, completed_at = ?3, error = ?4 WHERE id = ?1",
                    rusqlite::params![execution_id, status.as_str(), now, error],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "execution",
                        id: execution_id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Fetch a single execution by ID, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get_execution(&self, id: &str) -> StoreResult<Option<WorkflowExecution>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, workflow_id, status, started_at, completed_at, step_results, error, triggered_by \
                     FROM workflow_executions WHERE id = ?1",
                    rusqlite::params![id],
                    map_execution_row,
                );
                match result {
                    Ok(row) => row.into_execution().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List executions of one workflow, most recent first.
    #[instrument(skip(self))]
    pub async fn list_executions(
        &self,
        workflow_id: &str,
        limit: i64,
    ) -> StoreResult<Vec<WorkflowExecution>> {
        let workflow_id = workflow_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow_id, status, started_at, completed_at, step_results, error, triggered_by \
                     FROM workflow_executions WHERE workflow_id = ?1 ORDER BY started_at DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![workflow_id, limit], map_execution_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(|r| r.into_execution()).collect()
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

/// Raw workflow row before JSON deserialization.
///
/// Keeps the `rusqlite` row-mapping closure infallible, then converts in a
/// second step where `StoreError::Json` can be returned.
struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    steps: String,
    triggers: Option<String>,
    is_active: bool,
    created_at: i64,
    updated_at: i64,
}

fn map_workflow_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowRow> {
    Ok(WorkflowRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        steps: row.get(3)?,
        triggers: row.get(4)?,
        is_active: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl WorkflowRow {
    fn into_stored_workflow(self) -> StoreResult<StoredWorkflow> {
        let steps: Vec<StepSpec> = serde_json::from_str(&self.steps)?;
        let triggers: Option<serde_json::Value> =
            self.triggers.map(|t| serde_json::from_str(&t)).transpose()?;

        Ok(StoredWorkflow {
            id: self.id,
            name: self.name,
            description: self.description,
            steps,
            triggers,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Raw execution row before JSON deserialization.
struct ExecutionRow {
    id: String,
    workflow_id: String,
    status: String,
    started_at: i64,
    completed_at: Option<i64>,
    step_results: String,
    error: Option<String>,
    triggered_by: String,
}

fn map_execution_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRow> {
    Ok(ExecutionRow {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        status: row.get(2)?,
        started_at: row.get(3)?,
        completed_at: row.get(4)?,
        step_results: row.get(5)?,
        error: row.get(6)?,
        triggered_by: row.get(7)?,
    })
}

impl ExecutionRow {
    fn into_execution(self) -> StoreResult<WorkflowExecution> {
        let status = ExecutionStatus::parse(&self.status).ok_or_else(|| {
            StoreError::InvalidArgument(format!("unknown execution status: {}", self.status))
        })?;
        let step_results: Vec<StepRecord> = serde_json::from_str(&self.step_results)?;

        Ok(WorkflowExecution {
            id: self.id,
            workflow_id: self.workflow_id,
            status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            step_results,
            error: self.error,
            triggered_by: self.triggered_by,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
