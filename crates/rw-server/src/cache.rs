//! Two-tier cache repository.
//!
//! Every record kind lives in the SQLite store and, for hot lookups, in a
//! bounded in-memory map. Both tiers carry the absolute expiry and re-check it
//! on read. Reads go memory first, then the database, promoting database hits
//! into memory. Cache writes are best effort: a failed persistent write is
//! logged at `warn` and never fails the caller.

use std::collections::HashMap;

use parking_lot::Mutex;
use rw_av::MediaProbe;
use rw_core::config::CacheConfig;
use rw_core::{ContentId, ResolvedSource, SourceHash};
use rw_db::pool::{get_conn, DbPool, PooledConnection};
use rw_db::queries;
use rw_db::queries::prune::{PruneStats, TableCounts};
use rw_db::queries::resolved_streams::StreamTiming;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::resolve::Resolution;

// ---------------------------------------------------------------------------
// Memory tier
// ---------------------------------------------------------------------------

/// A cached value with its absolute expiry (unix ms).
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: i64,
    pub updated_at: i64,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        self.expires_at >= now_ms
    }
}

/// Bounded string-keyed map whose entries expire.
#[derive(Debug)]
pub struct TtlMap<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    max_entries: usize,
}

impl<V: Clone> TtlMap<V> {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Fresh entry for `key`. An expired entry is removed and reported as a
    /// miss.
    pub fn get(&self, key: &str, now_ms: i64) -> Option<CacheEntry<V>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now_ms) => Some(entry.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace. When the map is full, expired entries go first,
    /// then the least recently updated one.
    pub fn insert(&self, key: String, value: V, expires_at: i64, now_ms: i64) {
        if expires_at < now_ms {
            return;
        }
        let mut entries = self.entries.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, e| e.is_fresh(now_ms));
            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.updated_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                updated_at: now_ms,
            },
        );
    }

    /// Replace the value and expiry of an existing entry in place.
    pub fn update(&self, key: &str, f: impl FnOnce(&mut CacheEntry<V>)) -> bool {
        match self.entries.lock().get_mut(key) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }

    /// Drop expired entries.
    pub fn prune(&self, now_ms: i64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(now_ms));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Resolved streams are cached per info-hash and content, since the file
/// chosen from a multi-episode torrent depends on the episode.
pub fn stream_key(hash: &SourceHash, content: &ContentId) -> String {
    format!("{hash}|{content}")
}

/// Probes are keyed by the torrent file when known, since debrid URLs for the
/// same file change between unrestricts.
pub fn probe_key(source_hash: Option<&SourceHash>, selected_file: Option<&str>, input: &str) -> String {
    match (source_hash, selected_file) {
        (Some(hash), Some(file)) => format!("hash:{hash}:{file}"),
        (Some(hash), None) => format!("hash:{hash}"),
        _ => format!("url:{input}"),
    }
}

/// Name for an on-disk artifact derived from `parts` (subtitle files,
/// transcode job directories). An empty extension yields a bare name.
pub fn digest_name(parts: &[&str], extension: &str) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    if extension.is_empty() {
        digest[..32].to_string()
    } else {
        format!("{}.{extension}", &digest[..32])
    }
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamEntry {
    source: ResolvedSource,
    is_ephemeral: bool,
    next_validation_at: i64,
}

/// A resolved stream read back from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedStream {
    pub source: ResolvedSource,
    /// Ephemeral and past its validation deadline: probe before serving.
    pub needs_validation: bool,
}

/// Entry counts for the debug endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub memory: MemoryCounts,
    pub persistent: TableCounts,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCounts {
    pub quick_start: usize,
    pub resolved_streams: usize,
    pub metadata: usize,
    pub media_probes: usize,
}

pub struct CacheStore {
    db: DbPool,
    ttl: CacheConfig,
    quick_start: TtlMap<Resolution>,
    streams: TtlMap<StreamEntry>,
    metadata: TtlMap<serde_json::Value>,
    probes: TtlMap<MediaProbe>,
}

fn secs_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

fn log_write(result: rw_core::Result<()>, table: &str, key: &str) {
    if let Err(e) = result {
        tracing::warn!(table, key, error = %e, "Cache write failed");
    }
}

impl CacheStore {
    pub fn new(db: DbPool, ttl: CacheConfig) -> Self {
        let cap = ttl.memory_max_entries;
        Self {
            db,
            ttl,
            quick_start: TtlMap::new(cap),
            streams: TtlMap::new(cap),
            metadata: TtlMap::new(cap),
            probes: TtlMap::new(cap),
        }
    }

    fn read<T>(&self, table: &str, key: &str, f: impl FnOnce(&PooledConnection) -> rw_core::Result<Option<T>>) -> Option<T> {
        let result = get_conn(&self.db).and_then(|conn| f(&conn));
        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(table, key, error = %e, "Cache read failed");
                None
            }
        }
    }

    fn write(&self, table: &str, key: &str, f: impl FnOnce(&PooledConnection) -> rw_core::Result<()>) {
        log_write(get_conn(&self.db).and_then(|conn| f(&conn)), table, key);
    }

    // -- quick start --------------------------------------------------------

    pub fn get_quick_start(&self, key: &str) -> Option<Resolution> {
        let now = rw_core::now_ms();
        if let Some(entry) = self.quick_start.get(key, now) {
            return Some(entry.value);
        }
        let (value, row) = self.read("quick_start", key, |conn| {
            queries::quick_start::get::<Resolution>(conn, key, now)
        })?;
        self.quick_start.insert(key.to_string(), value.clone(), row.expires_at, now);
        Some(value)
    }

    pub fn put_quick_start(&self, key: &str, value: &Resolution) {
        let now = rw_core::now_ms();
        let expires_at = now + secs_ms(self.ttl.quick_start_ttl_secs);
        self.quick_start.insert(key.to_string(), value.clone(), expires_at, now);
        self.write("quick_start", key, |conn| {
            queries::quick_start::put(conn, key, value, expires_at, now)
        });
    }

    pub fn invalidate_quick_start(&self, key: &str) {
        self.quick_start.remove(key);
        self.write("quick_start", key, |conn| {
            queries::quick_start::delete(conn, key).map(|_| ())
        });
    }

    /// Drop the quick-start results of every resolution of a title.
    pub fn invalidate_title(&self, prefix: &str) -> usize {
        let memory = self.quick_start.remove_prefix(prefix);
        let persisted = match get_conn(&self.db)
            .and_then(|conn| queries::quick_start::delete_for_content(&conn, prefix))
        {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(prefix, error = %e, "Failed to invalidate persisted quick-start entries");
                0
            }
        };
        tracing::debug!(prefix, memory, persisted, "Invalidated title quick-start entries");
        memory.max(persisted)
    }

    // -- resolved streams ---------------------------------------------------

    pub fn get_stream(&self, hash: &SourceHash, content: &ContentId) -> Option<CachedStream> {
        let key = stream_key(hash, content);
        let now = rw_core::now_ms();
        let entry = match self.streams.get(&key, now) {
            Some(entry) => entry.value,
            None => {
                let (source, row) = self.read("resolved_streams", &key, |conn| {
                    queries::resolved_streams::get::<ResolvedSource>(conn, &key, now)
                })?;
                let entry = StreamEntry {
                    source,
                    is_ephemeral: row.is_ephemeral,
                    next_validation_at: row.next_validation_at,
                };
                self.streams.insert(key, entry.clone(), row.expires_at, now);
                entry
            }
        };
        Some(CachedStream {
            needs_validation: entry.is_ephemeral && now >= entry.next_validation_at,
            source: entry.source,
        })
    }

    pub fn put_stream(&self, hash: &SourceHash, content: &ContentId, source: &ResolvedSource, is_ephemeral: bool) {
        let key = stream_key(hash, content);
        let now = rw_core::now_ms();
        let timing = StreamTiming {
            is_ephemeral,
            next_validation_at: now + secs_ms(self.ttl.ephemeral_validation_secs),
            expires_at: now + secs_ms(self.ttl.resolved_stream_ttl_secs),
        };
        let entry = StreamEntry {
            source: source.clone(),
            is_ephemeral,
            next_validation_at: timing.next_validation_at,
        };
        self.streams.insert(key.clone(), entry, timing.expires_at, now);
        self.write("resolved_streams", &key, |conn| {
            queries::resolved_streams::put(conn, &key, source, timing, now)
        });
    }

    /// Push the validation deadline of an ephemeral stream forward.
    pub fn mark_stream_validated(&self, hash: &SourceHash, content: &ContentId) {
        let key = stream_key(hash, content);
        let now = rw_core::now_ms();
        let next = now + secs_ms(self.ttl.ephemeral_validation_secs);
        self.streams.update(&key, |e| e.value.next_validation_at = next);
        self.write("resolved_streams", &key, |conn| {
            queries::resolved_streams::mark_validated(conn, &key, next, now).map(|_| ())
        });
    }

    pub fn evict_stream(&self, hash: &SourceHash, content: &ContentId) {
        let key = stream_key(hash, content);
        self.streams.remove(&key);
        self.write("resolved_streams", &key, |conn| {
            queries::resolved_streams::delete(conn, &key).map(|_| ())
        });
    }

    // -- metadata -----------------------------------------------------------

    pub fn get_metadata<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = rw_core::now_ms();
        let value = match self.metadata.get(key, now) {
            Some(entry) => entry.value,
            None => {
                let (value, row) = self.read("metadata", key, |conn| {
                    queries::metadata::get_entry::<serde_json::Value>(conn, key, now)
                })?;
                self.metadata.insert(key.to_string(), value.clone(), row.expires_at, now);
                value
            }
        };
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(key, error = %e, "Dropping undecodable metadata entry");
                self.metadata.remove(key);
                None
            }
        }
    }

    pub fn put_metadata<T: Serialize>(&self, key: &str, value: &T) {
        let now = rw_core::now_ms();
        let expires_at = now + secs_ms(self.ttl.metadata_ttl_secs);
        match serde_json::to_value(value) {
            Ok(json) => {
                self.metadata.insert(key.to_string(), json.clone(), expires_at, now);
                self.write("metadata", key, |conn| {
                    queries::metadata::put(conn, key, &json, expires_at, now)
                });
            }
            Err(e) => tracing::warn!(key, error = %e, "Metadata value not serializable"),
        }
    }

    // -- media probes -------------------------------------------------------

    pub fn get_probe(&self, key: &str) -> Option<MediaProbe> {
        let now = rw_core::now_ms();
        if let Some(entry) = self.probes.get(key, now) {
            return Some(entry.value);
        }
        let (probe, row) = self.read("media_probes", key, |conn| {
            queries::media_probes::get_entry::<MediaProbe>(conn, key, now)
        })?;
        self.probes.insert(key.to_string(), probe.clone(), row.expires_at, now);
        Some(probe)
    }

    pub fn put_probe(&self, key: &str, probe: &MediaProbe) {
        let now = rw_core::now_ms();
        let expires_at = now + secs_ms(self.ttl.media_probe_ttl_secs);
        self.probes.insert(key.to_string(), probe.clone(), expires_at, now);
        self.write("media_probes", key, |conn| {
            queries::media_probes::put(conn, key, probe, expires_at, now)
        });
    }

    // -- maintenance --------------------------------------------------------

    /// Sweep expired rows from both tiers.
    pub fn prune(&self, now_ms: i64) -> rw_core::Result<PruneStats> {
        self.quick_start.prune(now_ms);
        self.streams.prune(now_ms);
        self.metadata.prune(now_ms);
        self.probes.prune(now_ms);
        let stale_before = now_ms - secs_ms(self.ttl.source_health_stale_secs);
        let conn = get_conn(&self.db)?;
        queries::prune::prune_expired(&conn, now_ms, stale_before)
    }

    /// Drop every cached record. Sessions, health and preferences survive.
    pub fn clear(&self) -> rw_core::Result<usize> {
        let memory = self.quick_start.len() + self.streams.len() + self.metadata.len() + self.probes.len();
        self.quick_start.clear();
        self.streams.clear();
        self.metadata.clear();
        self.probes.clear();
        let conn = get_conn(&self.db)?;
        let persisted = queries::prune::clear_caches(&conn)?;
        tracing::info!(memory, persisted, "Cleared caches");
        Ok(persisted)
    }

    pub fn stats(&self) -> rw_core::Result<CacheStats> {
        let conn = get_conn(&self.db)?;
        Ok(CacheStats {
            memory: MemoryCounts {
                quick_start: self.quick_start.len(),
                resolved_streams: self.streams.len(),
                metadata: self.metadata.len(),
                media_probes: self.probes.len(),
            },
            persistent: queries::prune::table_counts(&conn)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{PlaybackLinks, TrackInfo};
    use rw_db::pool::init_memory_pool;

    const HASH: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    fn source(url: &str) -> ResolvedSource {
        ResolvedSource {
            playable_url: url.into(),
            fallback_urls: vec![],
            filename: "Film.2020.1080p.mp4".into(),
            source_hash: Some(HASH.parse().unwrap()),
            selected_file: None,
        }
    }

    fn resolution(url: &str) -> Resolution {
        Resolution {
            source: source(url),
            tracks: TrackInfo::default(),
            links: PlaybackLinks::default(),
        }
    }

    #[test]
    fn ttl_map_rechecks_expiry() {
        let map: TtlMap<u32> = TtlMap::new(8);
        map.insert("a".into(), 1, 100, 0);
        assert_eq!(map.get("a", 100).map(|e| e.value), Some(1));
        assert!(map.get("a", 101).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn ttl_map_evicts_oldest_when_full() {
        let map: TtlMap<u32> = TtlMap::new(2);
        map.insert("a".into(), 1, 1_000, 1);
        map.insert("b".into(), 2, 1_000, 2);
        map.insert("c".into(), 3, 1_000, 3);
        assert_eq!(map.len(), 2);
        assert!(map.get("a", 4).is_none());
        assert!(map.get("c", 4).is_some());
    }

    #[test]
    fn ttl_map_prefers_evicting_expired() {
        let map: TtlMap<u32> = TtlMap::new(2);
        map.insert("old".into(), 1, 1_000, 1);
        map.insert("stale".into(), 2, 5, 2);
        map.insert("new".into(), 3, 1_000, 10);
        assert!(map.get("old", 10).is_some());
        assert!(map.get("new", 10).is_some());
    }

    #[test]
    fn ttl_map_remove_prefix() {
        let map: TtlMap<u32> = TtlMap::new(8);
        map.insert("movie:1|en|any".into(), 1, 1_000, 0);
        map.insert("movie:1|auto|any".into(), 2, 1_000, 0);
        map.insert("movie:10|en|any".into(), 3, 1_000, 0);
        assert_eq!(map.remove_prefix("movie:1|"), 2);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn quick_start_survives_memory_loss() {
        let pool = init_memory_pool().unwrap();
        let store = CacheStore::new(pool.clone(), CacheConfig::default());
        store.put_quick_start("movie:1|en|any", &resolution("https://cdn/a.mp4"));

        // A second store over the same database starts with a cold memory tier.
        let cold = CacheStore::new(pool, CacheConfig::default());
        let hit = cold.get_quick_start("movie:1|en|any").unwrap();
        assert_eq!(hit.source.playable_url, "https://cdn/a.mp4");
        assert_eq!(cold.stats().unwrap().memory.quick_start, 1);
    }

    #[test]
    fn invalidate_title_clears_both_tiers() {
        let pool = init_memory_pool().unwrap();
        let store = CacheStore::new(pool, CacheConfig::default());
        store.put_quick_start("movie:1|en|any", &resolution("u1"));
        store.put_quick_start("movie:1|auto|any", &resolution("u2"));
        store.put_quick_start("movie:12|en|any", &resolution("u3"));
        store.invalidate_title("movie:1|");
        assert!(store.get_quick_start("movie:1|en|any").is_none());
        assert!(store.get_quick_start("movie:1|auto|any").is_none());
        assert!(store.get_quick_start("movie:12|en|any").is_some());
    }

    #[test]
    fn ephemeral_stream_needs_validation_after_deadline() {
        let pool = init_memory_pool().unwrap();
        let ttl = CacheConfig {
            ephemeral_validation_secs: 0,
            ..CacheConfig::default()
        };
        let store = CacheStore::new(pool, ttl);
        let hash: SourceHash = HASH.parse().unwrap();
        let content = ContentId::Movie { tmdb_id: 9 };

        store.put_stream(&hash, &content, &source("https://cdn/x.mp4"), true);
        let cached = store.get_stream(&hash, &content).unwrap();
        assert!(cached.needs_validation);

        store.put_stream(&hash, &content, &source("https://cdn/y.mp4"), false);
        let cached = store.get_stream(&hash, &content).unwrap();
        assert!(!cached.needs_validation);
        assert_eq!(cached.source.playable_url, "https://cdn/y.mp4");

        store.evict_stream(&hash, &content);
        assert!(store.get_stream(&hash, &content).is_none());
    }

    #[test]
    fn metadata_roundtrip_and_clear() {
        let pool = init_memory_pool().unwrap();
        let store = CacheStore::new(pool, CacheConfig::default());
        store.put_metadata("details:movie:1", &serde_json::json!({"imdbId": "tt1"}));
        let back: serde_json::Value = store.get_metadata("details:movie:1").unwrap();
        assert_eq!(back["imdbId"], "tt1");

        store.put_probe("url:x", &MediaProbe::default());
        assert!(store.get_probe("url:x").is_some());

        assert!(store.clear().unwrap() >= 2);
        assert!(store.get_metadata::<serde_json::Value>("details:movie:1").is_none());
        assert!(store.get_probe("url:x").is_none());
    }

    #[test]
    fn digest_names_are_stable_and_distinct() {
        assert_eq!(digest_name(&["a", "1"], "vtt"), digest_name(&["a", "1"], "vtt"));
        assert_ne!(digest_name(&["a", "1"], "vtt"), digest_name(&["a1"], "vtt"));
        assert!(digest_name(&["x"], "vtt").ends_with(".vtt"));
        assert_eq!(digest_name(&["x"], "").len(), 32);
    }

    #[test]
    fn probe_key_prefers_torrent_identity() {
        let hash: SourceHash = HASH.parse().unwrap();
        assert_eq!(
            probe_key(Some(&hash), Some("/Film.mkv"), "https://x"),
            format!("hash:{HASH}:/Film.mkv")
        );
        assert_eq!(probe_key(None, None, "https://x"), "url:https://x");
    }
}
