//! Expiry sweeps and diagnostics across every cache table.

use rusqlite::Connection;
use rw_core::{Error, Result};
use serde::Serialize;

/// Tables whose rows carry an `expires_at` column.
const EXPIRING: &[&str] = &[
    "resolved_streams",
    "quick_start",
    "metadata",
    "playback_sessions",
    "media_probes",
];

/// Rows removed by one [`prune_expired`] pass, per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    pub resolved_streams: usize,
    pub quick_start: usize,
    pub metadata: usize,
    pub playback_sessions: usize,
    pub media_probes: usize,
    pub source_health: usize,
}

impl PruneStats {
    pub fn total(&self) -> usize {
        self.resolved_streams
            + self.quick_start
            + self.metadata
            + self.playback_sessions
            + self.media_probes
            + self.source_health
    }
}

/// Delete every expired row, plus source health rows untouched since
/// `health_stale_before`.
pub fn prune_expired(conn: &Connection, now_ms: i64, health_stale_before: i64) -> Result<PruneStats> {
    let mut removed = [0usize; 5];
    for (slot, table) in removed.iter_mut().zip(EXPIRING) {
        *slot = conn
            .execute(&format!("DELETE FROM {table} WHERE expires_at < ?1"), [now_ms])
            .map_err(|e| Error::database(e.to_string()))?;
    }
    let source_health = conn
        .execute("DELETE FROM source_health WHERE updated_at < ?1", [health_stale_before])
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(PruneStats {
        resolved_streams: removed[0],
        quick_start: removed[1],
        metadata: removed[2],
        playback_sessions: removed[3],
        media_probes: removed[4],
        source_health,
    })
}

/// Row counts per table, for the debug endpoint.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCounts {
    pub resolved_streams: i64,
    pub quick_start: i64,
    pub metadata: i64,
    pub playback_sessions: i64,
    pub source_health: i64,
    pub media_probes: i64,
    pub title_preferences: i64,
}

pub fn table_counts(conn: &Connection) -> Result<TableCounts> {
    Ok(TableCounts {
        resolved_streams: super::count(conn, "resolved_streams")?,
        quick_start: super::count(conn, "quick_start")?,
        metadata: super::count(conn, "metadata")?,
        playback_sessions: super::count(conn, "playback_sessions")?,
        source_health: super::count(conn, "source_health")?,
        media_probes: super::count(conn, "media_probes")?,
        title_preferences: super::count(conn, "title_preferences")?,
    })
}

/// Drop the pure caches. Sessions, health counters and preferences are state,
/// not cache, and survive.
pub fn clear_caches(conn: &Connection) -> Result<usize> {
    let mut total = 0;
    for table in ["resolved_streams", "quick_start", "metadata", "media_probes"] {
        total += conn
            .execute(&format!("DELETE FROM {table}"), [])
            .map_err(|e| Error::database(e.to_string()))?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use crate::queries::{metadata, quick_start, source_health};
    use rw_core::{PlaybackOutcome, SourceHash};

    #[test]
    fn prune_removes_only_expired() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        quick_start::put(&conn, "old", &1, 10, 0).unwrap();
        quick_start::put(&conn, "new", &1, 1_000, 0).unwrap();
        metadata::put(&conn, "m", &1, 5, 0).unwrap();

        let hash: SourceHash = "f".repeat(40).parse().unwrap();
        source_health::record(&conn, &hash, PlaybackOutcome::Success, 3).unwrap();

        let stats = prune_expired(&conn, 100, 2).unwrap();
        assert_eq!(stats.quick_start, 1);
        assert_eq!(stats.metadata, 1);
        assert_eq!(stats.source_health, 0);
        assert_eq!(stats.total(), 2);

        let stats = prune_expired(&conn, 100, 4).unwrap();
        assert_eq!(stats.source_health, 1);
        assert_eq!(quick_start::count(&conn).unwrap(), 1);
    }

    #[test]
    fn clear_caches_keeps_state_tables() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        quick_start::put(&conn, "a", &1, 1_000, 0).unwrap();
        let hash: SourceHash = "e".repeat(40).parse().unwrap();
        source_health::record(&conn, &hash, PlaybackOutcome::Success, 3).unwrap();

        assert_eq!(clear_caches(&conn).unwrap(), 1);
        let counts = table_counts(&conn).unwrap();
        assert_eq!(counts.quick_start, 0);
        assert_eq!(counts.source_health, 1);
    }
}
