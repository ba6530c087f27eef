//! Cached metadata-provider responses (external id mappings).

use rusqlite::Connection;
use rw_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::CachedPayload;

const TABLE: &str = "metadata";
const KEY: &str = "cache_key";

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::init_memory_pool;

    #[test]
    fn stores_json_values() {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let value = serde_json::json!({"imdb_id": "tt0133093"});
        put(&conn, "external_ids:movie:603", &value, 10, 0).unwrap();
        let back: serde_json::Value = get(&conn, "external_ids:movie:603", 10).unwrap().unwrap();
        assert_eq!(back["imdb_id"], "tt0133093");
        assert!(get::<serde_json::Value>(&conn, "external_ids:movie:603", 11).unwrap().is_none());
    }
}
