//! Database schema migrations.
//!
//! Applies the schema for actions, correlation tokens and previews, tracked
//! in `schema_migrations`.

use rusqlite::Connection;
use tracing::info;

use tessera_core::error::TesseraError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), TesseraError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| TesseraError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| TesseraError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: actions");
    }

    Ok(())
}

/// Version 1: actions, correlations, previews.
fn apply_v1(conn: &Connection) -> Result<(), TesseraError> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS actions (
            id              TEXT PRIMARY KEY NOT NULL,
            user_id         TEXT NOT NULL,
            command_id      TEXT NOT NULL DEFAULT '',
            action_type     TEXT NOT NULL
                            CHECK (action_type IN ('research', 'todo', 'note', 'link',
                                                   'calendar', 'issue', 'reminder')),
            confidence      REAL NOT NULL,
            title           TEXT NOT NULL,
            status          TEXT NOT NULL
                            CHECK (status IN ('pending', 'awaiting_approval', 'processing',
                                              'completed', 'failed', 'rejected',
                                              'archived', 'conflict')),
            payload         TEXT NOT NULL DEFAULT '{}',
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_actions_user_created
            ON actions (user_id, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_actions_status_updated
            ON actions (status, updated_at ASC);

        -- Correlation tokens embedded in outbound approval requests.
        CREATE TABLE IF NOT EXISTS correlations (
            token           TEXT PRIMARY KEY NOT NULL,
            action_id       TEXT NOT NULL,
            user_id         TEXT NOT NULL,
            message_id      TEXT,
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (action_id) REFERENCES actions(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_correlations_message
            ON correlations (message_id)
            WHERE message_id IS NOT NULL;

        -- Previews written by the external preview producer.
        CREATE TABLE IF NOT EXISTS action_previews (
            action_id       TEXT PRIMARY KEY NOT NULL,
            status          TEXT NOT NULL
                            CHECK (status IN ('pending', 'ready', 'failed')),
            fields          TEXT NOT NULL DEFAULT '{}',
            generated_at    INTEGER NOT NULL,
            FOREIGN KEY (action_id) REFERENCES actions(id) ON DELETE CASCADE
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'actions');

        COMMIT;
        ",
    )
    .map_err(|e| TesseraError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
