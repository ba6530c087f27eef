//! Playback sessions and per-source health counters.
//!
//! Sessions remember the last source that played for a resolution key and
//! whether it is still trusted. Client progress reports drive the session
//! state machine; failures and first successful plays also feed the
//! per-info-hash health counters that ranking reads back.
//!
//! Unlike the caches, session writes propagate their errors.

use std::collections::HashMap;
use std::sync::Arc;

use rw_core::config::{CacheConfig, PlaybackConfig};
use rw_core::{
    Error, FailureKind, HealthState, PlaybackOutcome, PlaybackSession, ResolveKey, ResolvedSource, Result,
    SessionEvent, SourceHash, SourceHealthStat,
};
use rw_db::pool::{get_conn, DbPool};
use rw_db::queries;

/// One client progress report.
#[derive(Debug, Clone)]
pub struct ProgressReport {
    pub key: ResolveKey,
    pub position_secs: Option<f64>,
    /// `progress`, `stall`, or a failure kind such as `decode_error`.
    pub event: Option<String>,
    pub message: Option<String>,
}

impl ProgressReport {
    fn session_event(&self) -> Result<SessionEvent> {
        match self.event.as_deref().map(str::trim) {
            None | Some("") | Some("progress") | Some("playing") | Some("timeupdate") => {
                Ok(SessionEvent::Progress)
            }
            Some("stall") | Some("stalled") | Some("waiting") => Ok(SessionEvent::Stall),
            Some(other) => Ok(SessionEvent::Failure {
                kind: other.parse::<FailureKind>()?,
                message: self.message.clone(),
            }),
        }
    }
}

pub struct SessionTracker {
    db: DbPool,
    enabled: bool,
    validation_interval_ms: i64,
    session_ttl_ms: i64,
}

impl SessionTracker {
    /// Run tracker work on the blocking pool. Every tracker method touches
    /// SQLite.
    pub async fn run<T, F>(self: &Arc<Self>, f: F) -> Result<T>
    where
        F: FnOnce(&SessionTracker) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let tracker = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&tracker))
            .await
            .map_err(|e| Error::Internal(format!("session task failed: {e}")))?
    }

    pub fn new(db: DbPool, playback: &PlaybackConfig, cache: &CacheConfig) -> Self {
        Self {
            db,
            enabled: playback.sessions_enabled,
            validation_interval_ms: (playback.validation_interval_secs as i64).saturating_mul(1000),
            session_ttl_ms: (cache.session_ttl_secs as i64).saturating_mul(1000),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, key: &ResolveKey) -> Result<Option<PlaybackSession>> {
        if !self.enabled {
            return Ok(None);
        }
        let conn = get_conn(&self.db)?;
        queries::sessions::get(&conn, &key.cache_key(), rw_core::now_ms())
    }

    fn save(&self, session: &PlaybackSession) -> Result<()> {
        let conn = get_conn(&self.db)?;
        queries::sessions::upsert(&conn, session, session.updated_at + self.session_ttl_ms)
    }

    /// Replace the session for `key` with a fresh healthy one.
    pub fn store_resolved(&self, key: &ResolveKey, source: &ResolvedSource) -> Result<Option<PlaybackSession>> {
        if !self.enabled {
            return Ok(None);
        }
        let session = PlaybackSession::resolved(key, source.clone(), rw_core::now_ms(), self.validation_interval_ms);
        self.save(&session)?;
        tracing::debug!(session = %session.session_key, url = %source.playable_url, "Stored playback session");
        Ok(Some(session))
    }

    /// Mark the `auto` session of the same title invalid after an explicit
    /// language resolved, so `auto` stops serving the old pick.
    pub fn invalidate_auto(&self, key: &ResolveKey) -> Result<()> {
        if !self.enabled || key.is_auto_lang() {
            return Ok(());
        }
        let auto = key.as_auto();
        let Some(mut session) = self.get(&auto)? else {
            return Ok(());
        };
        if session.health == HealthState::Invalid {
            return Ok(());
        }
        session.health = HealthState::Invalid;
        session.last_error = Some(format!("superseded by '{}' resolution", key.audio_lang));
        session.updated_at = rw_core::now_ms();
        self.save(&session)?;
        tracing::debug!(session = %session.session_key, "Invalidated auto-language session");
        Ok(())
    }

    fn transition(&self, key: &ResolveKey, event: SessionEvent) -> Result<Option<PlaybackSession>> {
        let Some(mut session) = self.get(key)? else {
            return Ok(None);
        };
        let previous = session.apply(&event, rw_core::now_ms(), self.validation_interval_ms);
        if previous != session.health {
            tracing::info!(
                session = %session.session_key,
                from = %previous,
                to = %session.health,
                "Session health changed"
            );
        }
        self.save(&session)?;
        Ok(Some(session))
    }

    pub fn mark_validated(&self, key: &ResolveKey) -> Result<Option<PlaybackSession>> {
        self.transition(key, SessionEvent::ValidationPassed)
    }

    pub fn mark_validation_failed(&self, key: &ResolveKey, message: &str) -> Result<Option<PlaybackSession>> {
        self.transition(
            key,
            SessionEvent::ValidationFailed {
                message: message.to_string(),
            },
        )
    }

    /// Apply a client progress report.
    ///
    /// Returns `None` when sessions are disabled.
    ///
    /// # Errors
    ///
    /// [`rw_core::Error::NotFound`] when no live session exists for the key;
    /// [`rw_core::Error::Validation`] for an unknown event name.
    pub fn report_progress(&self, report: &ProgressReport) -> Result<Option<PlaybackSession>> {
        if !self.enabled {
            return Ok(None);
        }
        let event = report.session_event()?;
        let mut session = self
            .get(&report.key)?
            .ok_or_else(|| rw_core::Error::not_found("session", report.key.cache_key()))?;

        let now = rw_core::now_ms();
        let previous = session.apply(&event, now, self.validation_interval_ms);
        let first_success = match report.position_secs {
            Some(pos) => session.record_position(pos),
            None => false,
        };
        self.save(&session)?;

        if previous != session.health {
            tracing::info!(
                session = %session.session_key,
                from = %previous,
                to = %session.health,
                position = session.position_secs,
                "Session health changed"
            );
        }

        if let Some(hash) = session.source.source_hash.as_ref() {
            match &event {
                SessionEvent::Failure { kind, .. } => {
                    self.record_outcome(hash, PlaybackOutcome::Failure(*kind))?;
                }
                _ if first_success => {
                    self.record_outcome(hash, PlaybackOutcome::Success)?;
                }
                _ => {}
            }
        }

        Ok(Some(session))
    }

    pub fn record_outcome(&self, hash: &SourceHash, outcome: PlaybackOutcome) -> Result<SourceHealthStat> {
        let conn = get_conn(&self.db)?;
        let stat = queries::source_health::record(&conn, hash, outcome, rw_core::now_ms())?;
        tracing::debug!(
            hash = %hash,
            ?outcome,
            successes = stat.successes,
            failures = stat.failures(),
            "Recorded source outcome"
        );
        Ok(stat)
    }

    /// Health counters for the given hashes. Ranking works without them, so
    /// a read failure yields an empty map.
    pub fn health_for(&self, hashes: &[SourceHash]) -> HashMap<SourceHash, SourceHealthStat> {
        let result = get_conn(&self.db).and_then(|conn| queries::source_health::get_many(&conn, hashes));
        match result {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read source health");
                HashMap::new()
            }
        }
    }

    /// Live session counts per health state.
    pub fn summary(&self) -> Result<Vec<(String, i64)>> {
        let conn = get_conn(&self.db)?;
        queries::sessions::count_by_health(&conn)
    }
}
