//! Source health counters keyed by info-hash.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension};
use rw_core::{Error, PlaybackOutcome, Result, SourceHash, SourceHealthStat};

use crate::models::source_health_from_row;

const COLS: &str = "source_hash, successes, decode_failures, ended_early_failures, playback_error_failures, updated_at";

pub fn get(conn: &Connection, hash: &SourceHash) -> Result<Option<SourceHealthStat>> {
    let q = format!("SELECT {COLS} FROM source_health WHERE source_hash = ?1");
    conn.query_row(&q, [hash.as_str()], source_health_from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))
}

/// Fetch stats for many hashes at once; unknown hashes are simply absent.
pub fn get_many(conn: &Connection, hashes: &[SourceHash]) -> Result<HashMap<SourceHash, SourceHealthStat>> {
    let mut out = HashMap::new();
    if hashes.is_empty() {
        return Ok(out);
    }
    let placeholders = vec!["?"; hashes.len()].join(", ");
    let q = format!("SELECT {COLS} FROM source_health WHERE source_hash IN ({placeholders})");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(hashes.iter().map(|h| h.as_str())),
            source_health_from_row,
        )
        .map_err(|e| Error::database(e.to_string()))?;
    for row in rows {
        let stat = row.map_err(|e| Error::database(e.to_string()))?;
        out.insert(stat.source_hash.clone(), stat);
    }
    Ok(out)
}

/// Increment one counter, creating the row on first sight.
pub fn record(conn: &Connection, hash: &SourceHash, outcome: PlaybackOutcome, now_ms: i64) -> Result<SourceHealthStat> {
    let mut stat = get(conn, hash)?.unwrap_or_else(|| SourceHealthStat::new(hash.clone(), now_ms));
    stat.record(outcome, now_ms);
    upsert(conn, &stat)?;
    Ok(stat)
}

pub fn upsert(conn: &Connection, stat: &SourceHealthStat) -> Result<()> {
    conn.execute(
        "INSERT INTO source_health (source_hash, successes, decode_failures, ended_early_failures, playback_error_failures, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(source_hash) DO UPDATE SET
            successes = excluded.successes,
            decode_failures = excluded.decode_failures,
            ended_early_failures = excluded.ended_early_failures,
            playback_error_failures = excluded.playback_error_failures,
            updated_at = excluded.updated_at",
        rusqlite::params![
            stat.source_hash.as_str(),
            stat.successes,
            stat.decode_failures,
            stat.ended_early_failures,
            stat.playback_error_failures,
            stat.updated_at,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

pub fn count(conn: &Connection) -> Result<i64> {
    super::count(conn, "source_health")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use rw_core::FailureKind;

    fn hash(c: char) -> SourceHash {
        std::iter::repeat(c).take(40).collect::<String>().parse().unwrap()
    }

    #[test]
    fn record_accumulates() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let h = hash('a');
        record(&conn, &h, PlaybackOutcome::Success, 1).unwrap();
        record(&conn, &h, PlaybackOutcome::Failure(FailureKind::DecodeError), 2).unwrap();
        let stat = get(&conn, &h).unwrap().unwrap();
        assert_eq!(stat.successes, 1);
        assert_eq!(stat.decode_failures, 1);
        assert_eq!(stat.updated_at, 2);
    }

    #[test]
    fn get_many_skips_unknown() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        record(&conn, &hash('b'), PlaybackOutcome::Success, 1).unwrap();
        let map = get_many(&conn, &[hash('b'), hash('c')]).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&hash('b')));
        assert!(get_many(&conn, &[]).unwrap().is_empty());
    }
}
