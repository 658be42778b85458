//! Correlation tokens linking outbound approval requests to their action.
//!
//! A token is recorded before the approval request is sent. If the transport
//! returns its own message id, that id is attached afterwards so a reply that
//! only carries the transport id still resolves.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use tessera_core::error::TesseraError;

use crate::db::{storage_err, Database};

pub struct CorrelationRepository {
    db: Arc<Database>,
}

impl CorrelationRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a token for an action. Re-recording the same token is a no-op.
    pub fn record(&self, token: &str, action_id: Uuid, user_id: &str) -> Result<(), TesseraError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO correlations (token, action_id, user_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    token,
                    action_id.to_string(),
                    user_id,
                    Utc::now().timestamp_millis()
                ],
            )
            .map_err(|e| TesseraError::Storage(format!("Failed to record correlation: {}", e)))?;
            Ok(())
        })
    }

    /// Attach the transport's message id to a recorded token.
    pub fn attach_message_id(&self, token: &str, message_id: &str) -> Result<(), TesseraError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE correlations SET message_id = ?1 WHERE token = ?2",
                rusqlite::params![message_id, token],
            )
            .map_err(storage_err)?;
            Ok(())
        })
    }

    /// Resolve a token or a transport message id to its action.
    pub fn resolve(&self, token_or_message_id: &str) -> Result<Option<Uuid>, TesseraError> {
        let action_id: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT action_id FROM correlations WHERE token = ?1 OR message_id = ?1 LIMIT 1",
                rusqlite::params![token_or_message_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)
        })?;

        action_id
            .map(|id| {
                Uuid::parse_str(&id)
                    .map_err(|e| TesseraError::Storage(format!("Invalid UUID: {}", e)))
            })
            .transpose()
    }
}
