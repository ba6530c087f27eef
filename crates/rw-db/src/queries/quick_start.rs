//! Quick-start results: complete resolve responses keyed by resolution key.

use rusqlite::Connection;
use rw_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::CachedPayload;

const TABLE: &str = "quick_start";
const KEY: &str = "cache_key";

pub fn get<T: DeserializeOwned>(conn: &Connection, key: &str, now_ms: i64) -> Result<Option<(T, CachedPayload)>> {
    super::get_payload(conn, TABLE, KEY, key, now_ms)
}

pub fn put<T: Serialize>(conn: &Connection, key: &str, value: &T, expires_at: i64, now_ms: i64) -> Result<()> {
    super::put_payload(conn, TABLE, KEY, key, value, expires_at, now_ms)
}

pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
    super::delete_key(conn, TABLE, KEY, key)
}

/// Drop every quick-start row for one piece of content, across languages and
/// qualities.
pub fn delete_for_content(conn: &Connection, content_prefix: &str) -> Result<usize> {
    super::delete_prefix(conn, TABLE, KEY, content_prefix)
}

pub fn count(conn: &Connection) -> Result<i64> {
    super::count(conn, TABLE)
}
