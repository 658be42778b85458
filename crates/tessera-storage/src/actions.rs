//! Action persistence and the atomic status transition primitive.
//!
//! Every status write goes through [`ActionStore::update_status_if_with`],
//! which reads, compares and writes the row inside one transaction while the
//! connection lock is held. The `WHERE id = ? AND status = ?` guard on the
//! UPDATE keeps the write conditional even against another process sharing
//! the database file.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use tessera_core::error::TesseraError;
use tessera_core::state_machine::validate_transition;
use tessera_core::types::{
    Action, ActionFilter, ActionStatus, ActionType, NewAction, Payload, MAX_BATCH_IDS,
};

use crate::db::{storage_err, Database};

const ACTION_COLUMNS: &str =
    "id, user_id, command_id, action_type, confidence, title, status, payload, created_at, updated_at";

/// Result of a compare-and-set status write.
///
/// A mismatch is a normal outcome: someone else already moved the action.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Updated(Action),
    StatusMismatch { current: ActionStatus },
    NotFound,
}

impl TransitionOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, TransitionOutcome::Updated(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransitionOutcome::Updated(_) => "updated",
            TransitionOutcome::StatusMismatch { .. } => "status_mismatch",
            TransitionOutcome::NotFound => "not_found",
        }
    }
}

/// Repository for actions.
pub struct ActionStore {
    db: Arc<Database>,
}

impl ActionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new action in `pending`.
    pub fn create(&self, new: NewAction) -> Result<Action, TesseraError> {
        new.validate()?;
        let now = now_millis();
        let action = Action {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            command_id: new.command_id,
            action_type: new.action_type,
            confidence: new.confidence,
            title: new.title,
            status: ActionStatus::Pending,
            payload: new.payload,
            created_at: now,
            updated_at: now,
        };
        let payload = serde_json::to_string(&action.payload)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO actions (id, user_id, command_id, action_type, confidence, title, status, payload, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    action.id.to_string(),
                    action.user_id,
                    action.command_id,
                    action.action_type.as_str(),
                    action.confidence as f64,
                    action.title,
                    action.status.as_str(),
                    payload,
                    action.created_at.timestamp_millis(),
                    action.updated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| TesseraError::Storage(format!("Failed to create action: {}", e)))?;
            Ok(())
        })?;

        debug!(action_id = %action.id, action_type = %action.action_type, "Action created");
        Ok(action)
    }

    /// Find an action by id regardless of owner.
    pub fn get(&self, id: Uuid) -> Result<Option<Action>, TesseraError> {
        self.db.with_conn(|conn| select_action(conn, id))
    }

    /// Find an action the caller owns.
    ///
    /// Another user's action is reported as `Forbidden`, never filtered to
    /// look missing.
    pub fn get_owned(&self, user_id: &str, id: Uuid) -> Result<Action, TesseraError> {
        let action = self.get(id)?.ok_or(TesseraError::NotFound(id))?;
        if !action.is_owned_by(user_id) {
            return Err(TesseraError::Forbidden(id));
        }
        Ok(action)
    }

    /// List a user's actions, newest first.
    pub fn list_by_user(
        &self,
        user_id: &str,
        filter: &ActionFilter,
    ) -> Result<Vec<Action>, TesseraError> {
        let mut sql = format!("SELECT {} FROM actions WHERE user_id = ?", ACTION_COLUMNS);
        let mut params: Vec<Value> = vec![Value::Text(user_id.to_string())];

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({})", placeholders));
            params.extend(
                filter
                    .statuses
                    .iter()
                    .map(|s| Value::Text(s.as_str().to_string())),
            );
        }
        if let Some(action_type) = filter.action_type {
            sql.push_str(" AND action_type = ?");
            params.push(Value::Text(action_type.as_str().to_string()));
        }
        sql.push_str(" ORDER BY created_at DESC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(limit as i64));
        }

        self.db
            .with_conn(|conn| query_actions(conn, &sql, rusqlite::params_from_iter(params)))
    }

    /// Fetch up to [`MAX_BATCH_IDS`] actions. Ids that are missing or owned by
    /// someone else are dropped from the result.
    pub fn batch_get(&self, user_id: &str, ids: &[Uuid]) -> Result<Vec<Action>, TesseraError> {
        if ids.len() > MAX_BATCH_IDS {
            return Err(TesseraError::Validation(format!(
                "At most {} ids per batch, got {}",
                MAX_BATCH_IDS,
                ids.len()
            )));
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM actions WHERE user_id = ? AND id IN ({}) ORDER BY created_at DESC, id ASC",
            ACTION_COLUMNS, placeholders
        );
        let mut params: Vec<Value> = vec![Value::Text(user_id.to_string())];
        params.extend(ids.iter().map(|id| Value::Text(id.to_string())));

        self.db
            .with_conn(|conn| query_actions(conn, &sql, rusqlite::params_from_iter(params)))
    }

    /// Delete an action the caller owns. Correlations and previews cascade.
    pub fn delete(&self, user_id: &str, id: Uuid) -> Result<(), TesseraError> {
        self.db.with_conn(|conn| {
            let action = select_action(conn, id)?.ok_or(TesseraError::NotFound(id))?;
            if !action.is_owned_by(user_id) {
                return Err(TesseraError::Forbidden(id));
            }
            conn.execute(
                "DELETE FROM actions WHERE id = ?1",
                rusqlite::params![id.to_string()],
            )
            .map_err(|e| TesseraError::Storage(format!("Failed to delete action: {}", e)))?;
            info!(action_id = %id, "Action deleted");
            Ok(())
        })
    }

    /// Change the action type. Only legal while the action has not left
    /// `pending` or `awaiting_approval`.
    pub fn update_type(&self, id: Uuid, action_type: ActionType) -> Result<Action, TesseraError> {
        let now = now_millis();
        let mutable: Vec<Value> = ActionStatus::ALL
            .iter()
            .filter(|s| s.allows_type_change())
            .map(|s| Value::Text(s.as_str().to_string()))
            .collect();
        let sql = format!(
            "UPDATE actions SET action_type = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            placeholders(mutable.len())
        );
        let mut params = vec![
            Value::Text(action_type.as_str().to_string()),
            Value::Integer(now.timestamp_millis()),
            Value::Text(id.to_string()),
        ];
        params.extend(mutable);

        self.db.with_conn(|conn| {
            let changed = conn
                .execute(&sql, rusqlite::params_from_iter(params))
                .map_err(storage_err)?;

            let action = select_action(conn, id)?.ok_or(TesseraError::NotFound(id))?;
            if changed == 0 {
                return Err(TesseraError::InvalidOperation(format!(
                    "Cannot change the type of an action in status {}",
                    action.status
                )));
            }
            Ok(action)
        })
    }

    /// Compare-and-set the status without touching the payload.
    pub fn update_status_if(
        &self,
        id: Uuid,
        expected: ActionStatus,
        next: ActionStatus,
    ) -> Result<TransitionOutcome, TesseraError> {
        self.update_status_if_with(id, expected, next, None)
    }

    /// Compare-and-set the status, merging `patch` into the payload in the
    /// same transaction.
    ///
    /// Under N concurrent callers with the same `(expected, next)` exactly one
    /// sees `Updated`; the rest see `StatusMismatch`.
    pub fn update_status_if_with(
        &self,
        id: Uuid,
        expected: ActionStatus,
        next: ActionStatus,
        patch: Option<&Payload>,
    ) -> Result<TransitionOutcome, TesseraError> {
        validate_transition(expected, next)?;
        let now = now_millis();

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction().map_err(storage_err)?;

            let Some(mut action) = select_action(&tx, id)? else {
                return Ok(TransitionOutcome::NotFound);
            };
            if action.status != expected {
                return Ok(TransitionOutcome::StatusMismatch {
                    current: action.status,
                });
            }

            if let Some(patch) = patch {
                for (key, value) in patch {
                    action.payload.insert(key.clone(), value.clone());
                }
            }
            action.status = next;
            action.updated_at = now;
            let payload = serde_json::to_string(&action.payload)?;

            let changed = tx
                .execute(
                    "UPDATE actions SET status = ?1, payload = ?2, updated_at = ?3
                     WHERE id = ?4 AND status = ?5",
                    rusqlite::params![
                        next.as_str(),
                        payload,
                        now.timestamp_millis(),
                        id.to_string(),
                        expected.as_str(),
                    ],
                )
                .map_err(storage_err)?;

            if changed == 0 {
                // Lost to a writer outside this process.
                return Ok(match select_action(&tx, id)? {
                    Some(current) => TransitionOutcome::StatusMismatch {
                        current: current.status,
                    },
                    None => TransitionOutcome::NotFound,
                });
            }

            tx.commit().map_err(storage_err)?;
            debug!(action_id = %id, from = %expected, to = %next, "Status transition applied");
            Ok(TransitionOutcome::Updated(action))
        })
    }

    /// Actions matching `query` not updated since its cutoff, oldest first.
    pub fn list_stale(&self, query: &StaleQuery) -> Result<Vec<Action>, TesseraError> {
        if query.statuses.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "SELECT {} FROM actions WHERE status IN ({}) AND updated_at <= ?",
            ACTION_COLUMNS,
            placeholders(query.statuses.len())
        );
        let mut params: Vec<Value> = query
            .statuses
            .iter()
            .map(|s| Value::Text(s.as_str().to_string()))
            .collect();
        params.push(Value::Integer(query.older_than.timestamp_millis()));

        if let Some(types) = &query.action_types {
            if types.is_empty() {
                return Ok(Vec::new());
            }
            sql.push_str(&format!(" AND action_type IN ({})", placeholders(types.len())));
            params.extend(types.iter().map(|t| Value::Text(t.as_str().to_string())));
        }
        if let Some(max_retries) = query.retries_below {
            sql.push_str(
                " AND json_extract(payload, '$.retryable') = 1
                  AND COALESCE(json_extract(payload, '$.retryCount'), 0) < ?",
            );
            params.push(Value::Integer(i64::from(max_retries)));
        }

        sql.push_str(" ORDER BY updated_at ASC LIMIT ?");
        params.push(Value::Integer(query.limit as i64));

        self.db
            .with_conn(|conn| query_actions(conn, &sql, rusqlite::params_from_iter(params)))
    }
}

/// Candidate selection for [`ActionStore::list_stale`].
///
/// Rows the caller would skip anyway are filtered out here, so a backlog of
/// ineligible actions cannot fill every batch.
#[derive(Debug, Clone)]
pub struct StaleQuery {
    pub statuses: Vec<ActionStatus>,
    pub older_than: DateTime<Utc>,
    /// Only these types. `None` means any type.
    pub action_types: Option<Vec<ActionType>>,
    /// Only actions marked `retryable` whose `retryCount` is below this.
    pub retries_below: Option<u32>,
    pub limit: usize,
}

impl StaleQuery {
    pub fn new(statuses: &[ActionStatus], older_than: DateTime<Utc>, limit: usize) -> Self {
        Self {
            statuses: statuses.to_vec(),
            older_than,
            action_types: None,
            retries_below: None,
            limit,
        }
    }

    pub fn of_types(mut self, types: Vec<ActionType>) -> Self {
        self.action_types = Some(types);
        self
    }

    pub fn retryable_below(mut self, max_retries: u32) -> Self {
        self.retries_below = Some(max_retries);
        self
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// =============================================================================
// Row mapping
// =============================================================================

/// Raw column values as stored.
struct ActionRow {
    id: String,
    user_id: String,
    command_id: String,
    action_type: String,
    confidence: f64,
    title: String,
    status: String,
    payload: String,
    created_at: i64,
    updated_at: i64,
}

impl ActionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            command_id: row.get(2)?,
            action_type: row.get(3)?,
            confidence: row.get(4)?,
            title: row.get(5)?,
            status: row.get(6)?,
            payload: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_action(self) -> Result<Action, TesseraError> {
        Ok(Action {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| TesseraError::Storage(format!("Invalid UUID: {}", e)))?,
            user_id: self.user_id,
            command_id: self.command_id,
            action_type: self
                .action_type
                .parse::<ActionType>()
                .map_err(TesseraError::Storage)?,
            confidence: self.confidence as f32,
            title: self.title,
            status: self
                .status
                .parse::<ActionStatus>()
                .map_err(TesseraError::Storage)?,
            payload: serde_json::from_str(&self.payload)?,
            created_at: from_millis(self.created_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

fn select_action(conn: &Connection, id: Uuid) -> Result<Option<Action>, TesseraError> {
    let sql = format!("SELECT {} FROM actions WHERE id = ?1", ACTION_COLUMNS);
    let row = conn
        .query_row(&sql, rusqlite::params![id.to_string()], ActionRow::from_row)
        .optional()
        .map_err(storage_err)?;
    row.map(ActionRow::into_action).transpose()
}

fn query_actions<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<Action>, TesseraError> {
    let mut stmt = conn.prepare(sql).map_err(storage_err)?;
    let rows = stmt
        .query_map(params, ActionRow::from_row)
        .map_err(storage_err)?;

    let mut actions = Vec::new();
    for row in rows {
        actions.push(row.map_err(storage_err)?.into_action()?);
    }
    Ok(actions)
}

/// Current time truncated to the millisecond precision stored on disk.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, TesseraError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| TesseraError::Storage(format!("Invalid timestamp: {}", ms)))
}
