//! Schema for the persisted cache tiers, sessions and preferences.
//!
//! Each version is applied once, in its own transaction, and recorded in
//! `schema_migrations`.
//! Timestamps are unix milliseconds stored as INTEGER.

use rusqlite::Connection;
use rw_core::{Error, Result};

/// V1: initial schema, one table per cached record kind.
const V1_INITIAL: &str = r#"
-- Resolved streams (ephemeral debrid URLs carry a revalidation deadline)
CREATE TABLE resolved_streams (
    cache_key          TEXT PRIMARY KEY,
    payload            TEXT NOT NULL,
    is_ephemeral       INTEGER NOT NULL DEFAULT 0,
    next_validation_at INTEGER NOT NULL,
    expires_at         INTEGER NOT NULL,
    updated_at         INTEGER NOT NULL
);
CREATE INDEX idx_resolved_streams_expires ON resolved_streams(expires_at);

-- Quick-start results (full resolve responses)
CREATE TABLE quick_start (
    cache_key  TEXT PRIMARY KEY,
    payload    TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX idx_quick_start_expires ON quick_start(expires_at);

-- Metadata provider responses (external id lookups)
CREATE TABLE metadata (
    cache_key  TEXT PRIMARY KEY,
    payload    TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Playback sessions
CREATE TABLE playback_sessions (
    session_key TEXT PRIMARY KEY,
    tmdb_id     INTEGER NOT NULL,
    audio_lang  TEXT NOT NULL,
    health      TEXT NOT NULL,
    payload     TEXT NOT NULL,
    expires_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);
CREATE INDEX idx_playback_sessions_tmdb ON playback_sessions(tmdb_id);

-- Source health counters by info-hash
CREATE TABLE source_health (
    source_hash             TEXT PRIMARY KEY,
    successes               INTEGER NOT NULL DEFAULT 0,
    decode_failures         INTEGER NOT NULL DEFAULT 0,
    ended_early_failures    INTEGER NOT NULL DEFAULT 0,
    playback_error_failures INTEGER NOT NULL DEFAULT 0,
    updated_at              INTEGER NOT NULL
);

-- Media probes
CREATE TABLE media_probes (
    probe_key  TEXT PRIMARY KEY,
    payload    TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Sticky per-title language preferences
CREATE TABLE title_preferences (
    title_key     TEXT PRIMARY KEY,
    audio_lang    TEXT,
    subtitle_lang TEXT,
    updated_at    INTEGER NOT NULL
);
"#;

/// `(version, sql)`, ascending.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Bring `conn` up to the latest schema version.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;

        tracing::debug!(version, "Applied database migration");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        // second call is a no-op
        run_migrations(&conn).unwrap();
    }

    #[test]
    fn test_all_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = [
            "resolved_streams",
            "quick_start",
            "metadata",
            "playback_sessions",
            "source_health",
            "media_probes",
            "title_preferences",
            "schema_migrations",
        ];
        for t in &tables {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                    [t],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "table {t} should exist");
        }
    }
}
