//! Database query modules.
//!
//! Every payload-bearing table shares the same read policy: rows past their
//! `expires_at` are invisible, and a payload that no longer decodes is
//! deleted and reported as a miss.

pub mod media_probes;
pub mod metadata;
pub mod prune;
pub mod quick_start;
pub mod resolved_streams;
pub mod sessions;
pub mod source_health;
pub mod title_preferences;

use rusqlite::{Connection, OptionalExtension};
use rw_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::CachedPayload;

/// Decode a JSON payload, deleting the row when it is malformed.
pub(crate) fn decode_or_evict<T: DeserializeOwned>(
    conn: &Connection,
    table: &str,
    key_col: &str,
    key: &str,
    payload: &str,
) -> Result<Option<T>> {
    match serde_json::from_str(payload) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(table, key, error = %e, "Evicting malformed cached payload");
            conn.execute(&format!("DELETE FROM {table} WHERE {key_col} = ?1"), [key])
                .map_err(|e| Error::database(e.to_string()))?;
            Ok(None)
        }
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("payload encode: {e}")))
}

/// Read a live payload from a `(key, payload, expires_at, updated_at)` table.
pub(crate) fn get_payload<T: DeserializeOwned>(
    conn: &Connection,
    table: &str,
    key_col: &str,
    key: &str,
    now_ms: i64,
) -> Result<Option<(T, CachedPayload)>> {
    let q = format!(
        "SELECT {key_col}, payload, expires_at, updated_at FROM {table}
         WHERE {key_col} = ?1 AND expires_at >= ?2"
    );
    let row = conn
        .query_row(&q, rusqlite::params![key, now_ms], CachedPayload::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;

    let Some(row) = row else {
        return Ok(None);
    };
    Ok(decode_or_evict(conn, table, key_col, key, &row.payload)?.map(|v| (v, row)))
}

/// Insert or replace a payload with an absolute expiry.
pub(crate) fn put_payload<T: Serialize>(
    conn: &Connection,
    table: &str,
    key_col: &str,
    key: &str,
    value: &T,
    expires_at: i64,
    now_ms: i64,
) -> Result<()> {
    let payload = encode(value)?;
    let q = format!(
        "INSERT INTO {table} ({key_col}, payload, expires_at, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT({key_col}) DO UPDATE SET
            payload = excluded.payload,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at"
    );
    conn.execute(&q, rusqlite::params![key, payload, expires_at, now_ms])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

pub(crate) fn delete_key(conn: &Connection, table: &str, key_col: &str, key: &str) -> Result<bool> {
    let n = conn
        .execute(&format!("DELETE FROM {table} WHERE {key_col} = ?1"), [key])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Delete every row whose key starts with `prefix`.
pub(crate) fn delete_prefix(conn: &Connection, table: &str, key_col: &str, prefix: &str) -> Result<usize> {
    let pattern = format!("{}%", escape_like(prefix));
    conn.execute(
        &format!("DELETE FROM {table} WHERE {key_col} LIKE ?1 ESCAPE '\\'"),
        [pattern],
    )
    .map_err(|e| Error::database(e.to_string()))
}

pub(crate) fn count(conn: &Connection, table: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .map_err(|e| Error::database(e.to_string()))
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;

    #[test]
    fn expired_payload_is_invisible() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        put_payload(&conn, "quick_start", "cache_key", "k", &vec![1, 2], 1_000, 0).unwrap();

        let hit: Option<(Vec<i32>, _)> = get_payload(&conn, "quick_start", "cache_key", "k", 1_000).unwrap();
        assert_eq!(hit.unwrap().0, vec![1, 2]);

        let miss: Option<(Vec<i32>, _)> = get_payload(&conn, "quick_start", "cache_key", "k", 1_001).unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn malformed_payload_is_deleted() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO metadata (cache_key, payload, expires_at, updated_at) VALUES ('bad', '{not json', 9999, 0)",
            [],
        )
        .unwrap();

        let miss: Option<(Vec<i32>, _)> = get_payload(&conn, "metadata", "cache_key", "bad", 0).unwrap();
        assert!(miss.is_none());
        assert_eq!(count(&conn, "metadata").unwrap(), 0);
    }

    #[test]
    fn prefix_delete_escapes_wildcards() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        for key in ["movie:1|en|any", "movie:1|fr|any", "movie:10|en|any", "movie_1|x"] {
            put_payload(&conn, "quick_start", "cache_key", key, &0, 10, 0).unwrap();
        }
        let removed = delete_prefix(&conn, "quick_start", "cache_key", "movie:1|").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(count(&conn, "quick_start").unwrap(), 2);
    }
}
