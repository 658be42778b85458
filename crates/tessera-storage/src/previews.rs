//! Storage for externally generated action previews.

use std::sync::Arc;

use rusqlite::OptionalExtension;
use uuid::Uuid;

use tessera_core::error::TesseraError;
use tessera_core::types::{ActionPreview, PreviewStatus};

use crate::actions::from_millis;
use crate::db::{storage_err, Database};

pub struct PreviewRepository {
    db: Arc<Database>,
}

impl PreviewRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace the preview for an action.
    pub fn put(&self, preview: &ActionPreview) -> Result<(), TesseraError> {
        let fields = serde_json::to_string(&preview.fields)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO action_previews (action_id, status, fields, generated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(action_id) DO UPDATE SET
                    status = excluded.status,
                    fields = excluded.fields,
                    generated_at = excluded.generated_at",
                rusqlite::params![
                    preview.action_id.to_string(),
                    preview.status.to_string(),
                    fields,
                    preview.generated_at.timestamp_millis(),
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    TesseraError::NotFound(preview.action_id)
                }
                other => TesseraError::Storage(format!("Failed to store preview: {}", other)),
            })?;
            Ok(())
        })
    }

    pub fn get(&self, action_id: Uuid) -> Result<Option<ActionPreview>, TesseraError> {
        let row: Option<(String, String, i64)> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT status, fields, generated_at FROM action_previews WHERE action_id = ?1",
                rusqlite::params![action_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(storage_err)
        })?;

        let Some((status, fields, generated_at)) = row else {
            return Ok(None);
        };
        Ok(Some(ActionPreview {
            action_id,
            status: status
                .parse::<PreviewStatus>()
                .map_err(TesseraError::Storage)?,
            fields: serde_json::from_str(&fields)?,
            generated_at: from_millis(generated_at)?,
        }))
    }
}
