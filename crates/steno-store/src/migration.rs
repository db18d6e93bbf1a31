//! Schema migration system.
//!
//! Migrations are static SQL strings keyed by version number. The applied
//! version is tracked in a `_migrations` table so migrations are idempotent
//! and only run once per database.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    /// Human-readable description.
    description: &'static str,
    /// Raw SQL to execute. May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "workflows and workflow executions",
        sql: r#"
            CREATE TABLE workflows (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                description TEXT,
                steps       TEXT NOT NULL,
                triggers    TEXT,
                is_active   BOOLEAN DEFAULT 1,
                created_at  INTEGER NOT NULL,
                updated_at  INTEGER NOT NULL
            );

            CREATE TABLE workflow_executions (
                id           TEXT PRIMARY KEY,
                workflow_id  TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
                status       TEXT NOT NULL CHECK(status IN ('pending','running','completed','failed')),
                started_at   INTEGER NOT NULL,
                completed_at INTEGER,
                step_results TEXT NOT NULL DEFAULT '[]',
                error        TEXT,
                triggered_by TEXT NOT NULL
            );
            CREATE INDEX idx_executions_workflow ON workflow_executions(workflow_id);
            CREATE INDEX idx_executions_status ON workflow_executions(status);
        "#,
    },
    Migration {
        version: 2,
        description: "scheduled tasks and the task run log",
        sql: r#"
            CREATE TABLE scheduled_tasks (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                task_type       TEXT NOT NULL CHECK(task_type IN ('workflow','capability','notification','report')),
                task_config     TEXT NOT NULL,
                schedule_type   TEXT NOT NULL CHECK(schedule_type IN ('once','interval','daily','weekly','monthly','cron')),
                schedule_config TEXT NOT NULL,
                is_active       BOOLEAN DEFAULT 1,
                last_run        INTEGER,
                next_run        INTEGER NOT NULL,
                run_count       INTEGER NOT NULL DEFAULT 0,
                max_runs        INTEGER,
                created_at      INTEGER NOT NULL,
                updated_at      INTEGER NOT NULL
            );
            CREATE INDEX idx_tasks_due ON scheduled_tasks(is_active, next_run);

            CREATE TABLE task_run_log (
                id           TEXT PRIMARY KEY,
                task_id      TEXT NOT NULL REFERENCES scheduled_tasks(id) ON DELETE CASCADE,
                status       TEXT NOT NULL CHECK(status IN ('running','completed','failed')),
                started_at   INTEGER NOT NULL,
                completed_at INTEGER,
                result       TEXT,
                error        TEXT
            );
            CREATE INDEX idx_run_log_task ON task_run_log(task_id);
        "#,
    },
    Migration {
        version: 3,
        description: "command approval requests",
        sql: r#"
            CREATE TABLE command_approvals (
                id             TEXT PRIMARY KEY,
                command        TEXT NOT NULL,
                security_level TEXT NOT NULL CHECK(security_level IN ('safe','moderate','dangerous')),
                status         TEXT NOT NULL CHECK(status IN ('pending','approved','denied')),
                requested_at   INTEGER NOT NULL,
                resolved_at    INTEGER,
                resolved_by    TEXT,
                result         TEXT,
                error          TEXT
            );
            CREATE INDEX idx_approvals_status ON command_approvals(status);
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// This is a **synchronous** function; call it from `spawn_blocking`.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    info!(
        new_version = MIGRATIONS.last().map(|m| m.version).unwrap_or(0),
        "all migrations applied"
    );
    Ok(())
}

/// Return the latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    let version: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read current version: {e}"),
        })?;
    Ok(version)
}

// ── internals ────────────────────────────────────────────────────────

/// Create the `_migrations` bookkeeping table if it does not exist.
fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })?;
    Ok(())
}

/// Apply a single migration inside a transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    // `conn.transaction()` needs `&mut Connection`, so the transaction is
    // managed manually.
    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to begin transaction: {e}"),
        })?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| StoreError::Migration {
                version: migration.version,
                message: format!("SQL execution failed: {e}"),
            })?;

        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, now],
        )
        .map_err(|e| StoreError::Migration {
            version: migration.version,
            message: format!("failed to record migration: {e}"),
        })?;

        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| StoreError::Migration {
                    version: migration.version,
                    message: format!("failed to commit: {e}"),
                })?;
            info!(version = migration.version, "migration applied");
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    /// The expected latest migration version (update when adding migrations).
    const LATEST_VERSION: u32 = 3;

    #[test]
    fn migrations_are_ordered() {
        for window in MIGRATIONS.windows(2) {
            assert!(
                window[1].version > window[0].version,
                "migration versions must be strictly increasing: {} >= {}",
                window[0].version,
                window[1].version,
            );
        }
    }

    #[test]
    fn run_all_on_fresh_db() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let version = current_version(&conn).unwrap();
        assert_eq!(version, LATEST_VERSION);
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = setup_conn();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let version = current_version(&conn).unwrap();
        assert_eq!(version, LATEST_VERSION);
    }

    #[test]
    fn migrations_create_all_tables() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
                )
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .map(|r| r.unwrap())
                .collect()
        };

        // v1 tables
        assert!(tables.contains(&"workflows".to_string()));
        assert!(tables.contains(&"workflow_executions".to_string()));
        // v2 tables
        assert!(tables.contains(&"scheduled_tasks".to_string()));
        assert!(tables.contains(&"task_run_log".to_string()));
        // v3 tables
        assert!(tables.contains(&"command_approvals".to_string()));
    }

    #[test]
    fn execution_status_check_constraint() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO workflows (id, name, steps, created_at, updated_at) \
             VALUES ('wf-1', 'test', '[]', 0, 0)",
            [],
        )
        .unwrap();

        // Valid status passes.
        conn.execute(
            "INSERT INTO workflow_executions (id, workflow_id, status, started_at, triggered_by) \
             VALUES ('ex-1', 'wf-1', 'running', 0, 'manual')",
            [],
        )
        .unwrap();

        // Invalid status is rejected.
        let bad = conn.execute(
            "INSERT INTO workflow_executions (id, workflow_id, status, started_at, triggered_by) \
             VALUES ('ex-2', 'wf-1', 'paused', 0, 'manual')",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn execution_rows_cascade_on_workflow_delete() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO workflows (id, name, steps, created_at, updated_at) \
             VALUES ('wf-1', 'test', '[]', 0, 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO workflow_executions (id, workflow_id, status, started_at, triggered_by) \
             VALUES ('ex-1', 'wf-1', 'completed', 0, 'manual')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM workflows WHERE id = 'wf-1'", [])
            .unwrap();

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM workflow_executions", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn task_type_check_constraint() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        // Valid task type passes.
        conn.execute(
            "INSERT INTO scheduled_tasks (id, name, task_type, task_config, schedule_type, schedule_config, next_run, created_at, updated_at) \
             VALUES ('t-1', 'daily digest', 'notification', '{}', 'daily', '{}', 0, 0, 0)",
            [],
        )
        .unwrap();

        // Invalid task type is rejected.
        let bad = conn.execute(
            "INSERT INTO scheduled_tasks (id, name, task_type, task_config, schedule_type, schedule_config, next_run, created_at, updated_at) \
             VALUES ('t-2', 'bad', 'webhook', '{}', 'daily', '{}', 0, 0, 0)",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn approval_status_check_constraint() {
        let conn = setup_conn();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO command_approvals (id, command, security_level, status, requested_at) \
             VALUES ('a-1', 'rm -rf /', 'dangerous', 'pending', 0)",
            [],
        )
        .unwrap();

        let bad = conn.execute(
            "INSERT INTO command_approvals (id, command, security_level, status, requested_at) \
             VALUES ('a-2', 'ls', 'mild', 'pending', 0)",
            [],
        );
        assert!(bad.is_err());
    }
}
