//! Approval gate for dangerous commands.
//!
//! The gate pairs the [`CommandClassifier`](crate::classifier::CommandClassifier)
//! with a persisted queue of approval requests. Safe and moderate commands
//! clear immediately; dangerous commands are parked as `pending` rows until
//! a human approves or denies them. Resolution is exactly-once: a request
//! leaves `pending` a single time, and later attempts fail with
//! [`GuardError::AlreadyResolved`].
//!
//! The gate never executes anything. Callers run the command after approval
//! and may attach the outcome to the request row for audit.
//!
//! The `command_approvals` table lives in the shared database; this module
//! owns all SQL against it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use steno_capability::InvokeOutcome;
use steno_store::{Database, StoreError, StoreResult};
use uuid::Uuid;

use crate::classifier::{CommandClassifier, SecurityLevel};
use crate::error::{GuardError, GuardResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for a human decision.
    Pending,
    /// Cleared to run.
    Approved,
    /// Refused; the command must not run.
    Denied,
}

impl ApprovalStatus {
    /// Convert to the string stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    /// Parse from the string stored in SQLite.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted request to run a dangerous command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandApprovalRequest {
    /// Unique identifier (UUID v7).
    pub id: String,

    /// The command as submitted (trimmed, otherwise verbatim).
    pub command: String,

    /// The classifier's verdict at request time.
    pub security_level: SecurityLevel,

    /// Where the request is in its lifecycle.
    pub status: ApprovalStatus,

    /// Unix timestamp when the request was created.
    pub requested_at: i64,

    /// Unix timestamp when the request was approved or denied.
    pub resolved_at: Option<i64>,

    /// Who approved or denied it.
    pub resolved_by: Option<String>,

    /// Execution result attached after the command ran.
    pub result: Option<serde_json::Value>,

    /// Execution error attached after the command failed.
    pub error: Option<String>,
}

/// What the gate decided about a submitted command.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// The command may run now.
    Cleared { level: SecurityLevel },
    /// The command is parked until the request is approved.
    PendingApproval { request_id: String },
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

const REQUEST_COLUMNS: &str =
    "id, command, security_level, status, requested_at, resolved_at, resolved_by, result, error";

/// Outcome of a resolution attempt, gathered inside the database closure.
enum Transition {
    Applied(RequestRow),
    Blocked(String),
    Missing,
}

/// Classifies commands and keeps the approval queue.
pub struct ApprovalGate {
    db: Database,
    classifier: CommandClassifier,
}

impl ApprovalGate {
    /// Create a gate over the shared database.
    pub fn new(db: Database, classifier: CommandClassifier) -> Self {
        Self { db, classifier }
    }

    /// Classify a command without touching the queue.
    pub fn classify(&self, command: &str) -> SecurityLevel {
        self.classifier.classify(command)
    }

    /// Classify a command and, if it is dangerous, park it for approval.
    pub async fn submit(&self, command: &str) -> GuardResult<GateDecision> {
        let level = self.classifier.classify(command);
        match level {
            SecurityLevel::Safe | SecurityLevel::Moderate => {
                tracing::debug!(level = %level, "command cleared");
                Ok(GateDecision::Cleared { level })
            }
            SecurityLevel::Dangerous => {
                let request = self.request(command, level).await?;
                Ok(GateDecision::PendingApproval {
                    request_id: request.id,
                })
            }
        }
    }

    /// Persist a pending approval request.
    pub async fn request(
        &self,
        command: &str,
        level: SecurityLevel,
    ) -> GuardResult<CommandApprovalRequest> {
        let command = command.trim();
        if command.is_empty() {
            return Err(GuardError::InvalidCommand(
                "command must not be empty".to_string(),
            ));
        }

        let id = Uuid::now_v7().to_string();
        let now = Utc::now().timestamp();
        let request = CommandApprovalRequest {
            id: id.clone(),
            command: command.to_string(),
            security_level: level,
            status: ApprovalStatus::Pending,
            requested_at: now,
            resolved_at: None,
            resolved_by: None,
            result: None,
            error: None,
        };

        let command = command.to_string();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO command_approvals (id, command, security_level, status, requested_at) \
                     VALUES (?1, ?2, ?3, 'pending', ?4)",
                    rusqlite::params![id, command, level.as_str(), now],
                )?;
                Ok(())
            })
            .await?;

        tracing::info!(
            request_id = %request.id,
            level = %level,
            "approval requested"
        );
        Ok(request)
    }

    /// Approve a pending request. Exactly-once.
    pub async fn approve(
        &self,
        id: &str,
        resolved_by: &str,
    ) -> GuardResult<CommandApprovalRequest> {
        self.resolve(id, resolved_by, ApprovalStatus::Approved).await
    }

    /// Deny a pending request. Exactly-once.
    pub async fn deny(&self, id: &str, resolved_by: &str) -> GuardResult<CommandApprovalRequest> {
        self.resolve(id, resolved_by, ApprovalStatus::Denied).await
    }

    /// List requests still waiting for a decision, oldest first.
    pub async fn list_pending(&self) -> GuardResult<Vec<CommandApprovalRequest>> {
        let rows = self
            .db
            .execute(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM command_approvals \
                     WHERE status = 'pending' ORDER BY requested_at ASC, id ASC"
                ))?;
                let rows = stmt
                    .query_map([], map_request_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(into_request)
            .collect::<StoreResult<Vec<_>>>()?)
    }

    /// Fetch a single request by ID, returning `None` if not found.
    pub async fn get(&self, id: &str) -> GuardResult<Option<CommandApprovalRequest>> {
        let id = id.to_string();
        let row = self
            .db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {REQUEST_COLUMNS} FROM command_approvals WHERE id = ?1"),
                    rusqlite::params![id],
                    map_request_row,
                );
                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await?;

        Ok(row.map(into_request).transpose()?)
    }

    /// Attach the execution outcome to a request, for audit.
    ///
    /// The gate never runs commands; callers record here what happened after
    /// an approved command was executed.
    pub async fn attach_outcome(&self, id: &str, outcome: &InvokeOutcome) -> GuardResult<()> {
        let (result_json, error) = match outcome {
            InvokeOutcome::Ok { value } => (
                Some(serde_json::to_string(value).map_err(StoreError::from)?),
                None,
            ),
            InvokeOutcome::Err { message } => (None, Some(message.clone())),
        };

        let id_owned = id.to_string();
        let updated = self
            .db
            .execute(move |conn| {
                Ok(conn.execute(
                    "UPDATE command_approvals SET result = ?2, error = ?3 WHERE id = ?1",
                    rusqlite::params![id_owned, result_json, error],
                )?)
            })
            .await?;

        if updated == 0 {
            return Err(GuardError::RequestNotFound { id: id.to_string() });
        }
        tracing::debug!(request_id = %id, "execution outcome attached");
        Ok(())
    }

    /// Flip one pending row to a terminal status.
    async fn resolve(
        &self,
        id: &str,
        resolved_by: &str,
        status: ApprovalStatus,
    ) -> GuardResult<CommandApprovalRequest> {
        let id_owned = id.to_string();
        let by = resolved_by.to_string();
        let now = Utc::now().timestamp();

        let transition = self
            .db
            .execute(move |conn| {
                // The status guard makes the transition exactly-once: a row
                // that already left `pending` is not touched.
                let updated = conn.execute(
                    "UPDATE command_approvals \
                     SET status = ?2, resolved_at = ?3, resolved_by = ?4 \
                     WHERE id = ?1 AND status = 'pending'",
                    rusqlite::params![id_owned, status.as_str(), now, by],
                )?;

                if updated == 1 {
                    let row = conn.query_row(
                        &format!("SELECT {REQUEST_COLUMNS} FROM command_approvals WHERE id = ?1"),
                        rusqlite::params![id_owned],
                        map_request_row,
                    )?;
                    return Ok(Transition::Applied(row));
                }

                // Nothing flipped; find out whether the row is missing or
                // already resolved.
                let existing = conn.query_row(
                    "SELECT status FROM command_approvals WHERE id = ?1",
                    rusqlite::params![id_owned],
                    |row| row.get::<_, String>(0),
                );
                match existing {
                    Ok(current) => Ok(Transition::Blocked(current)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Transition::Missing),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await?;

        match transition {
            Transition::Applied(row) => {
                let request = into_request(row)?;
                tracing::info!(
                    request_id = %request.id,
                    status = %request.status,
                    resolved_by = %resolved_by,
                    "approval resolved"
                );
                Ok(request)
            }
            Transition::Blocked(current) => {
                let current = ApprovalStatus::parse(&current).ok_or_else(|| {
                    StoreError::InvalidArgument(format!("unknown approval status `{current}`"))
                })?;
                Err(GuardError::AlreadyResolved {
                    id: id.to_string(),
                    status: current,
                })
            }
            Transition::Missing => Err(GuardError::RequestNotFound { id: id.to_string() }),
        }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct RequestRow {
    id: String,
    command: String,
    security_level: String,
    status: String,
    requested_at: i64,
    resolved_at: Option<i64>,
    resolved_by: Option<String>,
    result: Option<String>,
    error: Option<String>,
}

fn map_request_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RequestRow> {
    Ok(RequestRow {
        id: row.get(0)?,
        command: row.get(1)?,
        security_level: row.get(2)?,
        status: row.get(3)?,
        requested_at: row.get(4)?,
        resolved_at: row.get(5)?,
        resolved_by: row.get(6)?,
        result: row.get(7)?,
        error: row.get(8)?,
    })
}

fn into_request(row: RequestRow) -> StoreResult<CommandApprovalRequest> {
    let security_level = SecurityLevel::parse(&row.security_level).ok_or_else(|| {
        StoreError::InvalidArgument(format!("unknown security level `{}`", row.security_level))
    })?;
    let status = ApprovalStatus::parse(&row.status).ok_or_else(|| {
        StoreError::InvalidArgument(format!("unknown approval status `{}`", row.status))
    })?;
    let result = row.result.as_deref().map(serde_json::from_str).transpose()?;

    Ok(CommandApprovalRequest {
        id: row.id,
        command: row.command,
        security_level,
        status,
        requested_at: row.requested_at,
        resolved_at: row.resolved_at,
        resolved_by: row.resolved_by,
        result,
        error: row.error,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierBuilder;
    use serde_json::json;

    async fn setup() -> ApprovalGate {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        ApprovalGate::new(db, ClassifierBuilder::new().build().unwrap())
    }

    #[tokio::test]
    async fn safe_and_moderate_commands_clear() {
        let gate = setup().await;

        let decision = gate.submit("ls -la").await.unwrap();
        assert_eq!(
            decision,
            GateDecision::Cleared {
                level: SecurityLevel::Safe
            }
        );

        let decision = gate.submit("rm notes.txt").await.unwrap();
        assert_eq!(
            decision,
            GateDecision::Cleared {
                level: SecurityLevel::Moderate
            }
        );

        // Cleared commands leave no trace in the queue.
        assert!(gate.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dangerous_command_parks_pending() {
        let gate = setup().await;

        let decision = gate.submit("  rm -rf /  ").await.unwrap();
        let GateDecision::PendingApproval { request_id } = decision else {
            panic!("expected PendingApproval, got {decision:?}");
        };

        let request = gate.get(&request_id).await.unwrap().unwrap();
        assert_eq!(request.command, "rm -rf /");
        assert_eq!(request.security_level, SecurityLevel::Dangerous);
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert!(request.resolved_at.is_none());
        assert!(request.resolved_by.is_none());
    }

    #[tokio::test]
    async fn approve_transitions_exactly_once() {
        let gate = setup().await;
        let request = gate
            .request("rm -rf /", SecurityLevel::Dangerous)
            .await
            .unwrap();

        let approved = gate.approve(&request.id, "alice").await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(approved.resolved_by.as_deref(), Some("alice"));
        assert!(approved.resolved_at.is_some());

        let err = gate.approve(&request.id, "bob").await.unwrap_err();
        match err {
            GuardError::AlreadyResolved { id, status } => {
                assert_eq!(id, request.id);
                assert_eq!(status, ApprovalStatus::Approved);
            }
            other => panic!("expected AlreadyResolved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deny_blocks_later_approval() {
        let gate = setup().await;
        let request = gate
            .request("dd if=/dev/zero of=/dev/sda", SecurityLevel::Dangerous)
            .await
            .unwrap();

        let denied = gate.deny(&request.id, "alice").await.unwrap();
        assert_eq!(denied.status, ApprovalStatus::Denied);

        let err = gate.approve(&request.id, "mallory").await.unwrap_err();
        assert!(matches!(
            err,
            GuardError::AlreadyResolved {
                status: ApprovalStatus::Denied,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn resolving_missing_request_is_not_found() {
        let gate = setup().await;
        let err = gate.approve("no-such-request", "alice").await.unwrap_err();
        assert!(matches!(err, GuardError::RequestNotFound { .. }));
    }

    #[tokio::test]
    async fn list_pending_shows_only_pending_oldest_first() {
        let gate = setup().await;
        let first = gate
            .request("rm -rf /tmp/a", SecurityLevel::Dangerous)
            .await
            .unwrap();
        let second = gate
            .request("rm -rf /tmp/b", SecurityLevel::Dangerous)
            .await
            .unwrap();
        let third = gate
            .request("rm -rf /tmp/c", SecurityLevel::Dangerous)
            .await
            .unwrap();

        gate.approve(&second.id, "alice").await.unwrap();

        let pending = gate.list_pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, third.id);
    }

    #[tokio::test]
    async fn attach_outcome_records_result_and_error() {
        let gate = setup().await;

        let request = gate
            .request("rm -rf /tmp/cache", SecurityLevel::Dangerous)
            .await
            .unwrap();
        gate.approve(&request.id, "alice").await.unwrap();
        gate.attach_outcome(&request.id, &InvokeOutcome::ok(json!({"removed": 42})))
            .await
            .unwrap();

        let row = gate.get(&request.id).await.unwrap().unwrap();
        assert_eq!(row.result, Some(json!({"removed": 42})));
        assert!(row.error.is_none());

        let request = gate
            .request("rm -rf /tmp/other", SecurityLevel::Dangerous)
            .await
            .unwrap();
        gate.approve(&request.id, "alice").await.unwrap();
        gate.attach_outcome(&request.id, &InvokeOutcome::err("permission denied"))
            .await
            .unwrap();

        let row = gate.get(&request.id).await.unwrap().unwrap();
        assert!(row.result.is_none());
        assert_eq!(row.error.as_deref(), Some("permission denied"));
    }

    #[tokio::test]
    async fn attach_outcome_to_missing_request_is_not_found() {
        let gate = setup().await;
        let err = gate
            .attach_outcome("no-such-request", &InvokeOutcome::ok(json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::RequestNotFound { .. }));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let gate = setup().await;
        let err = gate
            .request("   ", SecurityLevel::Dangerous)
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn get_missing_request_is_none() {
        let gate = setup().await;
        assert!(gate.get("no-such-request").await.unwrap().is_none());
    }
}
