//! Playback session persistence.
//!
//! The session is the sole source of truth for a key's last-known-good
//! source, so every write here propagates its error to the caller.

use rusqlite::{Connection, OptionalExtension};
use rw_core::{Error, PlaybackSession, Result};

use crate::models::SessionRow;

const TABLE: &str = "playback_sessions";
const KEY: &str = "session_key";
const COLS: &str = "session_key, tmdb_id, audio_lang, health, payload, expires_at, updated_at";

pub fn get(conn: &Connection, session_key: &str, now_ms: i64) -> Result<Option<PlaybackSession>> {
    let q = format!("SELECT {COLS} FROM {TABLE} WHERE session_key = ?1 AND expires_at >= ?2");
    let row = conn
        .query_row(&q, rusqlite::params![session_key, now_ms], SessionRow::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;
    match row {
        Some(row) => super::decode_or_evict(conn, TABLE, KEY, session_key, &row.payload),
        None => Ok(None),
    }
}

pub fn upsert(conn: &Connection, session: &PlaybackSession, expires_at: i64) -> Result<()> {
    let payload = super::encode(session)?;
    conn.execute(
        "INSERT INTO playback_sessions (session_key, tmdb_id, audio_lang, health, payload, expires_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(session_key) DO UPDATE SET
            tmdb_id = excluded.tmdb_id,
            audio_lang = excluded.audio_lang,
            health = excluded.health,
            payload = excluded.payload,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at",
        rusqlite::params![
            session.session_key,
            session.tmdb_id as i64,
            session.audio_lang,
            session.health.to_string(),
            payload,
            expires_at,
            session.updated_at,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// All live sessions for a title, across languages and qualities.
pub fn list_for_title(conn: &Connection, tmdb_id: u64, now_ms: i64) -> Result<Vec<PlaybackSession>> {
    let q = format!(
        "SELECT {COLS} FROM {TABLE} WHERE tmdb_id = ?1 AND expires_at >= ?2 ORDER BY updated_at DESC"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![tmdb_id as i64, now_ms], SessionRow::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    let mut sessions = Vec::with_capacity(rows.len());
    for row in rows {
        if let Some(s) = super::decode_or_evict(conn, TABLE, KEY, &row.session_key, &row.payload)? {
            sessions.push(s);
        }
    }
    Ok(sessions)
}

/// Session counts grouped by health state, for diagnostics.
pub fn count_by_health(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn
        .prepare("SELECT health, COUNT(*) FROM playback_sessions GROUP BY health ORDER BY health")
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

pub fn count(conn: &Connection) -> Result<i64> {
    super::count(conn, TABLE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;
    use rw_core::{ContentId, HealthState, ResolveKey, ResolvedSource, SessionEvent};

    fn session(lang: &str, now: i64) -> PlaybackSession {
        let key = ResolveKey::new(ContentId::Movie { tmdb_id: 603 }, lang, None);
        let source = ResolvedSource {
            playable_url: "https://cdn.example/m.mp4".into(),
            fallback_urls: vec![],
            filename: "m.mp4".into(),
            source_hash: None,
            selected_file: None,
        };
        PlaybackSession::resolved(&key, source, now, 90_000)
    }

    #[test]
    fn upsert_and_get() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let mut s = session("en", 0);
        upsert(&conn, &s, 10_000).unwrap();
        assert_eq!(get(&conn, &s.session_key, 5).unwrap().unwrap(), s);

        s.apply(&SessionEvent::Stall, 6, 90_000);
        upsert(&conn, &s, 10_000).unwrap();
        let back = get(&conn, &s.session_key, 7).unwrap().unwrap();
        assert_eq!(back.health, HealthState::Degraded);
        assert_eq!(count(&conn).unwrap(), 1);
    }

    #[test]
    fn expired_session_is_invisible() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let s = session("en", 0);
        upsert(&conn, &s, 100).unwrap();
        assert!(get(&conn, &s.session_key, 101).unwrap().is_none());
    }

    #[test]
    fn list_and_group_by_health() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        upsert(&conn, &session("en", 0), 1_000).unwrap();
        let mut fr = session("fr", 1);
        fr.apply(
            &SessionEvent::Failure {
                kind: rw_core::FailureKind::DecodeError,
                message: None,
            },
            2,
            90_000,
        );
        upsert(&conn, &fr, 1_000).unwrap();

        assert_eq!(list_for_title(&conn, 603, 10).unwrap().len(), 2);
        assert!(list_for_title(&conn, 604, 10).unwrap().is_empty());
        let groups = count_by_health(&conn).unwrap();
        assert_eq!(groups, vec![("healthy".to_string(), 1), ("invalid".to_string(), 1)]);
    }
}
