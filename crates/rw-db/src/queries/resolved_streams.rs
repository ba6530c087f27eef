//! Resolved stream cache rows.
//!
//! Ephemeral rows (URLs hosted by the debrid provider) carry a
//! `next_validation_at` deadline that callers check even while the row is
//! otherwise fresh.

use rusqlite::{Connection, OptionalExtension};
use rw_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::ResolvedStreamRow;

const TABLE: &str = "resolved_streams";
const KEY: &str = "cache_key";
const COLS: &str = "cache_key, payload, is_ephemeral, next_validation_at, expires_at, updated_at";

/// Write parameters for one resolved stream row.
#[derive(Debug, Clone, Copy)]
pub struct StreamTiming {
    pub is_ephemeral: bool,
    pub next_validation_at: i64,
    pub expires_at: i64,
}

pub fn get<T: DeserializeOwned>(
    conn: &Connection,
    key: &str,
    now_ms: i64,
) -> Result<Option<(T, ResolvedStreamRow)>> {
    let q = format!("SELECT {COLS} FROM {TABLE} WHERE cache_key = ?1 AND expires_at >= ?2");
    let row = conn
        .query_row(&q, rusqlite::params![key, now_ms], ResolvedStreamRow::from_row)
        .optional()
        .map_err(|e| Error::database(e.to_string()))?;
    let Some(row) = row else {
        return Ok(None);
    };
    Ok(super::decode_or_evict(conn, TABLE, KEY, key, &row.payload)?.map(|v| (v, row)))
}

pub fn put<T: Serialize>(conn: &Connection, key: &str, value: &T, timing: StreamTiming, now_ms: i64) -> Result<()> {
    let payload = super::encode(value)?;
    conn.execute(
        "INSERT INTO resolved_streams (cache_key, payload, is_ephemeral, next_validation_at, expires_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(cache_key) DO UPDATE SET
            payload = excluded.payload,
            is_ephemeral = excluded.is_ephemeral,
            next_validation_at = excluded.next_validation_at,
            expires_at = excluded.expires_at,
            updated_at = excluded.updated_at",
        rusqlite::params![
            key,
            payload,
            timing.is_ephemeral as i32,
            timing.next_validation_at,
            timing.expires_at,
            now_ms,
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Push the revalidation deadline forward after a successful check.
pub fn mark_validated(conn: &Connection, key: &str, next_validation_at: i64, now_ms: i64) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE resolved_streams SET next_validation_at = ?2, updated_at = ?3 WHERE cache_key = ?1",
            rusqlite::params![key, next_validation_at, now_ms],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
    super::delete_key(conn, TABLE, KEY, key)
}

pub fn delete_for_content(conn: &Connection, content_prefix: &str) -> Result<usize> {
    super::delete_prefix(conn, TABLE, KEY, content_prefix)
}

pub fn count(conn: &Connection) -> Result<i64> {
    super::count(conn, TABLE)
}
