//! Cached media probes keyed by source hash or URL.

use rusqlite::Connection;
use rw_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::CachedPayload;

const TABLE: &str = "media_probes";
const KEY: &str = "probe_key";

pub fn get<T: DeserializeOwned>(conn: &Connection, key: &str, now_ms: i64) -> Result<Option<T>> {
    Ok(get_entry(conn, key, now_ms)?.map(|(v, _)| v))
}

/// Like [`get`], also returning the row so callers can honor its expiry.
pub fn get_entry<T: DeserializeOwned>(conn: &Connection, key: &str, now_ms: i64) -> Result<Option<(T, CachedPayload)>> {
    super::get_payload(conn, TABLE, KEY, key, now_ms)
}

pub fn put<T: Serialize>(conn: &Connection, key: &str, value: &T, expires_at: i64, now_ms: i64) -> Result<()> {
    super::put_payload(conn, TABLE, KEY, key, value, expires_at, now_ms)
}

pub fn count(conn: &Connection) -> Result<i64> {
    super::count(conn, TABLE)
}
