//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`. Payload columns hold JSON; decoding them into domain
//! types happens in the query modules so a malformed row can be evicted.

use rw_core::{SourceHash, SourceHealthStat, TitlePreference};

// ---------------------------------------------------------------------------
// CachedPayload (quick_start, metadata, media_probes)
// ---------------------------------------------------------------------------

/// A keyed JSON payload with an absolute expiry.
#[derive(Debug, Clone)]
pub struct CachedPayload {
    pub key: String,
    pub payload: String,
    pub expires_at: i64,
    pub updated_at: i64,
}

impl CachedPayload {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            payload: row.get(1)?,
            expires_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }
}

// ---------------------------------------------------------------------------
// ResolvedStreamRow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ResolvedStreamRow {
    pub cache_key: String,
    pub payload: String,
    pub is_ephemeral: bool,
    pub next_validation_at: i64,
    pub expires_at: i64,
    pub updated_at: i64,
}

impl ResolvedStreamRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            cache_key: row.get(0)?,
            payload: row.get(1)?,
            is_ephemeral: row.get::<_, i32>(2)? != 0,
            next_validation_at: row.get(3)?,
            expires_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

// ---------------------------------------------------------------------------
// SessionRow
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub session_key: String,
    pub tmdb_id: i64,
    pub audio_lang: String,
    pub health: String,
    pub payload: String,
    pub expires_at: i64,
    pub updated_at: i64,
}

impl SessionRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            session_key: row.get(0)?,
            tmdb_id: row.get(1)?,
            audio_lang: row.get(2)?,
            health: row.get(3)?,
            payload: row.get(4)?,
            expires_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Source health
// ---------------------------------------------------------------------------

/// Build a [`SourceHealthStat`] from a `source_health` row.
pub fn source_health_from_row(row: &rusqlite::Row) -> rusqlite::Result<SourceHealthStat> {
    let raw: String = row.get(0)?;
    let source_hash: SourceHash = raw.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(SourceHealthStat {
        source_hash,
        successes: row.get(1)?,
        decode_failures: row.get(2)?,
        ended_early_failures: row.get(3)?,
        playback_error_failures: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

// ---------------------------------------------------------------------------
// Title preferences
// ---------------------------------------------------------------------------

pub fn title_preference_from_row(row: &rusqlite::Row) -> rusqlite::Result<TitlePreference> {
    Ok(TitlePreference {
        title_key: row.get(0)?,
        audio_lang: row.get(1)?,
        subtitle_lang: row.get(2)?,
        updated_at: row.get(3)?,
    })
}
