//! Scheduled task persistence and the append-only run log.
//!
//! A scheduled task names a thing to run (workflow, capability, notification,
//! report), a recurrence, and bookkeeping columns (`last_run`, `next_run`,
//! `run_count`, `max_runs`). The dispatcher owns the bookkeeping: a
//! successful run goes through [`TaskStore::record_run`] in one UPDATE, a
//! failed run touches nothing but the run log.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// What a scheduled task runs when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Run a stored workflow; `task_config` carries `workflow_id` and inputs.
    Workflow,
    /// Invoke one capability; `task_config` carries `capability` and `args`.
    Capability,
    /// Send a notification through the notification capability.
    Notification,
    /// Generate a report through the report capability.
    Report,
}

impl TaskType {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workflow => "workflow",
            Self::Capability => "capability",
            Self::Notification => "notification",
            Self::Report => "report",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "workflow" => Some(Self::Workflow),
            "capability" => Some(Self::Capability),
            "notification" => Some(Self::Notification),
            "report" => Some(Self::Report),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recurrence family of a scheduled task. The schedule parameters live in
/// `schedule_config` and are interpreted by the scheduler crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// Fire once at a fixed timestamp.
    Once,
    /// Fire every N minutes.
    Interval,
    /// Fire daily at HH:MM.
    Daily,
    /// Fire weekly on a given weekday at HH:MM.
    Weekly,
    /// Fire monthly on a given day at HH:MM.
    Monthly,
    /// Reduced cron form: minute and hour only.
    Cron,
}

impl ScheduleType {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Interval => "interval",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Cron => "cron",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "once" => Some(Self::Once),
            "interval" => Some(Self::Interval),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "cron" => Some(Self::Cron),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// Human-readable task name.
    pub name: String,
    /// What fires when the task is due.
    pub task_type: TaskType,
    /// Type-specific configuration (workflow id, capability args, ...).
    pub task_config: serde_json::Value,
    /// Recurrence family.
    pub schedule_type: ScheduleType,
    /// Recurrence parameters (time of day, interval minutes, ...).
    pub schedule_config: serde_json::Value,
    /// Whether the dispatcher considers this task at all.
    pub is_active: bool,
    /// Unix timestamp of the last successful run.
    pub last_run: Option<i64>,
    /// Unix timestamp when the task is next due.
    pub next_run: i64,
    /// Number of successful runs so far.
    pub run_count: i64,
    /// Deactivate after this many successful runs, if set.
    pub max_runs: Option<i64>,
    /// Unix timestamp when the task was created.
    pub created_at: i64,
    /// Unix timestamp when the task was last updated.
    pub updated_at: i64,
}

/// Fields for creating a scheduled task. `next_run` must already be computed
/// from the schedule; the store does not interpret schedules.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub task_type: TaskType,
    pub task_config: serde_json::Value,
    pub schedule_type: ScheduleType,
    pub schedule_config: serde_json::Value,
    pub next_run: i64,
    pub max_runs: Option<i64>,
}

/// Status of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Dispatch started, outcome not yet known.
    Running,
    /// The task's action succeeded.
    Completed,
    /// The task's action failed.
    Failed,
}

impl RunStatus {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only task run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunLog {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// The task that was dispatched.
    pub task_id: String,
    /// Outcome of the attempt.
    pub status: RunStatus,
    /// Unix timestamp when the attempt started.
    pub started_at: i64,
    /// Unix timestamp when the attempt finished.
    pub completed_at: Option<i64>,
    /// Success payload, if the attempt completed.
    pub result: Option<serde_json::Value>,
    /// Error message, if the attempt failed.
    pub error: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
//  TaskStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD and bookkeeping operations on scheduled tasks.
#[derive(Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    /// Create a new task store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a scheduled task and return the stored record.
    #[instrument(skip(self, task))]
    pub async fn create(&self, task: NewTask) -> StoreResult<ScheduledTask> {
        if task.name.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "task name must not be empty".to_string(),
            ));
        }
        if task.max_runs.is_some_and(|max| max < 1) {
            return Err(StoreError::InvalidArgument(
                "max_runs must be at least 1".to_string(),
            ));
        }

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().timestamp();

        let task_config_json = serde_json::to_string(&task.task_config)?;
        let schedule_config_json = serde_json::to_string(&task.schedule_config)?;

        let stored = ScheduledTask {
            id: id.clone(),
            name: task.name.clone(),
            task_type: task.task_type,
            task_config: task.task_config,
            schedule_type: task.schedule_type,
            schedule_config: task.schedule_config,
            is_active: true,
            last_run: None,
            next_run: task.next_run,
            run_count: 0,
            max_runs: task.max_runs,
            created_at: now,
            updated_at: now,
        };

        let name = task.name;
        let task_type = task.task_type;
        let schedule_type = task.schedule_type;
        let next_run = task.next_run;
        let max_runs = task.max_runs;

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO scheduled_tasks \
                     (id, name, task_type, task_config, schedule_type, schedule_config, is_active, next_run, run_count, max_runs, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, 0, ?8, ?9, ?9)",
                    rusqlite::params![
                        id,
                        name,
                        task_type.as_str(),
                        task_config_json,
                        schedule_type.as_str(),
                        schedule_config_json,
                        next_run,
                        max_runs,
                        now
                    ],
                )?;
                Ok(())
            })
            .await?;

        debug!(task_id = %stored.id, task_name = %stored.name, "scheduled task created");
        Ok(stored)
    }

    /// Fetch a single task by ID, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<ScheduledTask>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
                    rusqlite::params![id],
                    map_task_row,
                );
                match result {
                    Ok(row) => row.into_task().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List tasks ordered by next due time, with pagination.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<ScheduledTask>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM scheduled_tasks ORDER BY next_run ASC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![limit, offset], map_task_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(|r| r.into_task()).collect()
            })
            .await
    }

    /// List active tasks whose `next_run` is at or before `cutoff`.
    ///
    /// Read-only: dispatching a returned task is a separate, explicit call.
    #[instrument(skip(self))]
    pub async fn list_due(&self, cutoff: i64) -> StoreResult<Vec<ScheduledTask>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM scheduled_tasks \
                     WHERE is_active = 1 AND next_run <= ?1 ORDER BY next_run ASC"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![cutoff], map_task_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(|r| r.into_task()).collect()
            })
            .await
    }

    /// Toggle a task's active state.
    #[instrument(skip(self))]
    pub async fn set_active(&self, id: &str, active: bool) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE scheduled_tasks SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, active, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "scheduled task",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Delete a task by ID. Run log rows cascade.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM scheduled_tasks WHERE id = ?1",
                    rusqlite::params![id],
                )?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "scheduled task",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Return the total number of scheduled tasks.
    #[instrument(skip(self))]
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM scheduled_tasks", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
    }

    /// Apply post-success bookkeeping in a single UPDATE: set `last_run`,
    /// `next_run`, bump `run_count`, and optionally deactivate.
    ///
    /// Only the success path calls this; a failed run must leave every one of
    /// these columns untouched.
    #[instrument(skip(self))]
    pub async fn record_run(
        &self,
        id: &str,
        last_run: i64,
        next_run: i64,
        deactivate: bool,
    ) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE scheduled_tasks \
                     SET last_run = ?2, next_run = ?3, run_count = run_count + 1, \
                         is_active = CASE WHEN ?4 THEN 0 ELSE is_active END, updated_at = ?5 \
                     WHERE id = ?1",
                    rusqlite::params![id, last_run, next_run, deactivate, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "scheduled task",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    // ── run log ──────────────────────────────────────────────────────

    /// Append a `running` row to the run log for a dispatch attempt.
    #[instrument(skip(self))]
    pub async fn insert_run(&self, task_id: &str) -> StoreResult<TaskRunLog> {
        let id = Uuid::now_v7().to_string();
        let task_id = task_id.to_string();
        let now = Utc::now().timestamp();

        let log = TaskRunLog {
            id: id.clone(),
            task_id: task_id.clone(),
            status: RunStatus::Running,
            started_at: now,
            completed_at: None,
            result: None,
            error: None,
        };

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO task_run_log (id, task_id, status, started_at) \
                     VALUES (?1, ?2, 'running', ?3)",
                    rusqlite::params![id, task_id, now],
                )?;
                Ok(())
            })
            .await?;

        Ok(log)
    }

    /// Mark a run log row `completed` with an optional result payload.
    #[instrument(skip(self, result))]
    pub async fn complete_run(
        &self,
        run_id: &str,
        result: Option<&serde_json::Value>,
    ) -> StoreResult<()> {
        let run_id = run_id.to_string();
        let result_json = result.map(serde_json::to_string).transpose()?;
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE task_run_log SET status = 'completed', completed_at = ?2, result = ?3 \
                     WHERE id = ?1",
                    rusqlite::params![run_id, now, result_json],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "task run",
                        id: run_id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Mark a run log row `failed` with an error message.
    #[instrument(skip(self))]
    pub async fn fail_run(&self, run_id: &str, error: &str) -> StoreResult<()> {
        let run_id = run_id.to_string();
        let error = error.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE task_run_log SET status = 'failed', completed_at = ?2, error = ?3 \
                     WHERE id = ?1",
                    rusqlite::params![run_id, now, error],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "task run",
                        id: run_id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Fetch one run log row by ID, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get_run(&self, run_id: &str) -> StoreResult<Option<TaskRunLog>> {
        let run_id = run_id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, task_id, status, started_at, completed_at, result, error \
                     FROM task_run_log WHERE id = ?1",
                    rusqlite::params![run_id],
                    map_run_row,
                );
                match result {
                    Ok(row) => row.into_run_log().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List run log rows for one task, most recent first.
    #[instrument(skip(self))]
    pub async fn list_runs(&self, task_id: &str, limit: i64) -> StoreResult<Vec<TaskRunLog>> {
        let task_id = task_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, task_id, status, started_at, completed_at, result, error \
                     FROM task_run_log WHERE task_id = ?1 ORDER BY started_at DESC, id DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![task_id, limit], map_run_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(|r| r.into_run_log()).collect()
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

const TASK_COLUMNS: &str = "id, name, task_type, task_config, schedule_type, schedule_config, \
                            is_active, last_run, next_run, run_count, max_runs, created_at, updated_at";

/// Raw task row before JSON deserialization.
struct TaskRow {
    id: String,
    name: String,
    task_type: String,
    task_config: String,
    schedule_type: String,
    schedule_config: String,
    is_active: bool,
    last_run: Option<i64>,
    next_run: i64,
    run_count: i64,
    max_runs: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

fn map_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok(TaskRow {
        id: row.get(0)?,
        name: row.get(1)?,
        task_type: row.get(2)?,
        task_config: row.get(3)?,
        schedule_type: row.get(4)?,
        schedule_config: row.get(5)?,
        is_active: row.get(6)?,
        last_run: row.get(7)?,
        next_run: row.get(8)?,
        run_count: row.get(9)?,
        max_runs: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl TaskRow {
    fn into_task(self) -> StoreResult<ScheduledTask> {
        let task_type = TaskType::parse(&self.task_type).ok_or_else(|| {
            StoreError::InvalidArgument(format!("unknown task type: {}", self.task_type))
        })?;
        let schedule_type = ScheduleType::parse(&self.schedule_type).ok_or_else(|| {
            StoreError::InvalidArgument(format!("unknown schedule type: {}", self.schedule_type))
        })?;
        let task_config: serde_json::Value = serde_json::from_str(&self.task_config)?;
        let schedule_config: serde_json::Value = serde_json::from_str(&self.schedule_config)?;

        Ok(ScheduledTask {
            id: self.id,
            name: self.name,
            task_type,
            task_config,
            schedule_type,
            schedule_config,
            is_active: self.is_active,
            last_run: self.last_run,
            next_run: self.next_run,
            run_count: self.run_count,
            max_runs: self.max_runs,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Raw run log row before JSON deserialization.
struct RunRow {
    id: String,
    task_id: String,
    status: String,
    started_at: i64,
    completed_at: Option<i64>,
    result: Option<String>,
    error: Option<String>,
}

fn map_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        task_id: row.get(1)?,
        status: row.get(2)?,
        started_at: row.get(3)?,
        completed_at: row.get(4)?,
        result: row.get(5)?,
        error: row.get(6)?,
    })
}

impl RunRow {
    fn into_run_log(self) -> StoreResult<TaskRunLog> {
        let status = RunStatus::parse(&self.status).ok_or_else(|| {
            StoreError::InvalidArgument(format!("unknown run status: {}", self.status))
        })?;
        let result: Option<serde_json::Value> =
            self.result.map(|r| serde_json::from_str(&r)).transpose()?;

        Ok(TaskRunLog {
            id: self.id,
            task_id: self.task_id,
            status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            result,
            error: self.error,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
