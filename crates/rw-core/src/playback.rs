//! Resolved sources, playback sessions and source health records.
//!
//! Session health is an explicit state machine: [`HealthState::next`] is a
//! pure transition function and [`PlaybackSession::apply`] layers the
//! bookkeeping (fail counter, last error, validation deadline) on top of it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::keys::ResolveKey;
use crate::media::{Quality, SourceHash};
use crate::Error;

/// Playback position after which a session counts as a successful play of
/// its source.
pub const SUCCESS_THRESHOLD_SECS: f64 = 60.0;

// ---------------------------------------------------------------------------
// ResolvedSource
// ---------------------------------------------------------------------------

/// A playable stream produced by the reifier. Never mutated after creation;
/// a re-resolve produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSource {
    pub playable_url: String,
    #[serde(default)]
    pub fallback_urls: Vec<String>,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub source_hash: Option<SourceHash>,
    #[serde(default)]
    pub selected_file: Option<String>,
}

impl ResolvedSource {
    /// Every URL worth trying, primary first, without duplicates.
    pub fn all_urls(&self) -> Vec<&str> {
        let mut urls = vec![self.playable_url.as_str()];
        for url in &self.fallback_urls {
            if !urls.contains(&url.as_str()) {
                urls.push(url);
            }
        }
        urls
    }
}

// ---------------------------------------------------------------------------
// HealthState
// ---------------------------------------------------------------------------

/// Health of a playback session's current source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Invalid,
}

/// Kinds of client-reported playback failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DecodeError,
    EndedEarly,
    PlaybackError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecodeError => write!(f, "decode_error"),
            Self::EndedEarly => write!(f, "ended_early"),
            Self::PlaybackError => write!(f, "playback_error"),
        }
    }
}

impl FromStr for FailureKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "decode_error" | "decode" | "media_err_decode" => Ok(Self::DecodeError),
            "ended_early" | "ended_too_early" => Ok(Self::EndedEarly),
            "playback_error" | "error" | "media_err_network" | "media_err_src_not_supported" => {
                Ok(Self::PlaybackError)
            }
            other => Err(Error::Validation(format!("unknown playback event '{other}'"))),
        }
    }
}

/// Inputs to the session state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A fresh resolution stored this source.
    Resolved,
    /// Plain progress report.
    Progress,
    /// Client saw buffering it could not recover from quickly.
    Stall,
    /// Client confirmed the source cannot play.
    Failure { kind: FailureKind, message: Option<String> },
    /// Lazy revalidation reached the source.
    ValidationPassed,
    /// Lazy revalidation could not reach the source.
    ValidationFailed { message: String },
}

impl HealthState {
    /// Pure transition function.
    pub fn next(self, event: &SessionEvent) -> HealthState {
        match (self, event) {
            (_, SessionEvent::Resolved) => Self::Healthy,
            (_, SessionEvent::Failure { .. }) => Self::Invalid,
            (_, SessionEvent::ValidationFailed { .. }) => Self::Invalid,
            (Self::Invalid, _) => Self::Invalid,
            (_, SessionEvent::ValidationPassed) => Self::Healthy,
            (_, SessionEvent::Stall) => Self::Degraded,
            (_, SessionEvent::Progress) => Self::Healthy,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

impl FromStr for HealthState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "healthy" => Ok(Self::Healthy),
            "degraded" => Ok(Self::Degraded),
            "invalid" => Ok(Self::Invalid),
            other => Err(Error::Validation(format!("unknown health state '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// PlaybackSession
// ---------------------------------------------------------------------------

/// What the resolver should do with an existing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionReuse {
    /// Serve the stored source without touching the network.
    Reuse,
    /// Serve the stored source only if a reachability probe succeeds.
    Revalidate,
    /// Ignore the session and every cache; resolve from scratch.
    Bypass,
}

/// Last-known-good source for one resolution key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackSession {
    pub session_key: String,
    pub tmdb_id: u64,
    pub audio_lang: String,
    pub quality: Option<Quality>,
    pub source: ResolvedSource,
    pub position_secs: f64,
    pub health: HealthState,
    pub fail_count: u32,
    pub last_error: Option<String>,
    /// Unix milliseconds.
    pub next_validation_at: i64,
    #[serde(default)]
    pub success_recorded: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PlaybackSession {
    /// A fresh, healthy session for a just-resolved source.
    pub fn resolved(key: &ResolveKey, source: ResolvedSource, now_ms: i64, interval_ms: i64) -> Self {
        Self {
            session_key: key.cache_key(),
            tmdb_id: key.content.tmdb_id(),
            audio_lang: key.audio_lang.clone(),
            quality: key.quality,
            source,
            position_secs: 0.0,
            health: HealthState::Healthy,
            fail_count: 0,
            last_error: None,
            next_validation_at: now_ms + interval_ms,
            success_recorded: false,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    pub fn reuse_decision(&self, now_ms: i64) -> SessionReuse {
        match self.health {
            HealthState::Invalid | HealthState::Unknown => SessionReuse::Bypass,
            HealthState::Degraded => SessionReuse::Revalidate,
            HealthState::Healthy if now_ms >= self.next_validation_at => SessionReuse::Revalidate,
            HealthState::Healthy => SessionReuse::Reuse,
        }
    }

    /// Apply an event, returning the previous state.
    pub fn apply(&mut self, event: &SessionEvent, now_ms: i64, interval_ms: i64) -> HealthState {
        let previous = self.health;
        self.health = previous.next(event);
        self.updated_at = now_ms;

        match event {
            SessionEvent::Failure { kind, message } => {
                self.fail_count += 1;
                self.last_error = Some(match message {
                    Some(m) if !m.is_empty() => format!("{kind}: {m}"),
                    _ => kind.to_string(),
                });
            }
            SessionEvent::ValidationFailed { message } => {
                self.fail_count += 1;
                self.last_error = Some(message.clone());
            }
            SessionEvent::Resolved | SessionEvent::ValidationPassed => {
                self.next_validation_at = now_ms + interval_ms;
            }
            SessionEvent::Progress | SessionEvent::Stall => {}
        }

        previous
    }

    /// Record the position and report whether this crossing of the success
    /// threshold is the first one for the session.
    pub fn record_position(&mut self, position_secs: f64) -> bool {
        if position_secs.is_finite() && position_secs >= 0.0 {
            self.position_secs = position_secs;
        }
        if !self.success_recorded
            && self.health != HealthState::Invalid
            && self.position_secs >= SUCCESS_THRESHOLD_SECS
        {
            self.success_recorded = true;
            return true;
        }
        false
    }
}

// ---------------------------------------------------------------------------
// SourceHealthStat
// ---------------------------------------------------------------------------

/// Outcome fed into a source's health counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Success,
    Failure(FailureKind),
}

/// Running playback outcome counters for one info-hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealthStat {
    pub source_hash: SourceHash,
    pub successes: u32,
    pub decode_failures: u32,
    pub ended_early_failures: u32,
    pub playback_error_failures: u32,
    pub updated_at: i64,
}

impl SourceHealthStat {
    pub fn new(source_hash: SourceHash, now_ms: i64) -> Self {
        Self {
            source_hash,
            successes: 0,
            decode_failures: 0,
            ended_early_failures: 0,
            playback_error_failures: 0,
            updated_at: now_ms,
        }
    }

    pub fn record(&mut self, outcome: PlaybackOutcome, now_ms: i64) {
        match outcome {
            PlaybackOutcome::Success => self.successes += 1,
            PlaybackOutcome::Failure(FailureKind::DecodeError) => self.decode_failures += 1,
            PlaybackOutcome::Failure(FailureKind::EndedEarly) => self.ended_early_failures += 1,
            PlaybackOutcome::Failure(FailureKind::PlaybackError) => {
                self.playback_error_failures += 1
            }
        }
        self.updated_at = now_ms;
    }

    pub fn failures(&self) -> u32 {
        self.decode_failures + self.ended_early_failures + self.playback_error_failures
    }

    pub fn attempts(&self) -> u32 {
        self.successes + self.failures()
    }
}

// ---------------------------------------------------------------------------
// TitlePreference
// ---------------------------------------------------------------------------

/// Sticky per-title language choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitlePreference {
    pub title_key: String,
    pub audio_lang: Option<String>,
    pub subtitle_lang: Option<String>,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ContentId;

    const INTERVAL: i64 = 90_000;

    fn source() -> ResolvedSource {
        ResolvedSource {
            playable_url: "https://cdn.example/a.mp4".into(),
            fallback_urls: vec!["https://cdn.example/a.mp4".into(), "https://cdn.example/b.mp4".into()],
            filename: "Movie.2020.1080p.mp4".into(),
            source_hash: None,
            selected_file: None,
        }
    }

    fn session(now: i64) -> PlaybackSession {
        let key = ResolveKey::new(ContentId::Movie { tmdb_id: 7 }, "en", None);
        PlaybackSession::resolved(&key, source(), now, INTERVAL)
    }

    #[test]
    fn all_urls_deduplicates() {
        assert_eq!(
            source().all_urls(),
            vec!["https://cdn.example/a.mp4", "https://cdn.example/b.mp4"]
        );
    }

    #[test]
    fn transitions() {
        use HealthState::*;
        let fail = SessionEvent::Failure {
            kind: FailureKind::DecodeError,
            message: None,
        };
        assert_eq!(Unknown.next(&SessionEvent::Resolved), Healthy);
        assert_eq!(Healthy.next(&SessionEvent::Stall), Degraded);
        assert_eq!(Degraded.next(&SessionEvent::Progress), Healthy);
        assert_eq!(Healthy.next(&fail), Invalid);
        assert_eq!(Invalid.next(&SessionEvent::Progress), Invalid);
        assert_eq!(Invalid.next(&SessionEvent::ValidationPassed), Invalid);
        assert_eq!(Invalid.next(&SessionEvent::Resolved), Healthy);
        assert_eq!(
            Degraded.next(&SessionEvent::ValidationFailed { message: "gone".into() }),
            Invalid
        );
    }

    #[test]
    fn failure_increments_counter_and_records_error() {
        let mut s = session(0);
        let prev = s.apply(
            &SessionEvent::Failure {
                kind: FailureKind::PlaybackError,
                message: Some("network".into()),
            },
            10,
            INTERVAL,
        );
        assert_eq!(prev, HealthState::Healthy);
        assert_eq!(s.health, HealthState::Invalid);
        assert_eq!(s.fail_count, 1);
        assert_eq!(s.last_error.as_deref(), Some("playback_error: network"));
        assert_eq!(s.reuse_decision(20), SessionReuse::Bypass);
    }

    #[test]
    fn reuse_until_validation_due() {
        let mut s = session(1_000);
        assert_eq!(s.reuse_decision(1_000 + INTERVAL - 1), SessionReuse::Reuse);
        assert_eq!(s.reuse_decision(1_000 + INTERVAL), SessionReuse::Revalidate);
        s.apply(&SessionEvent::ValidationPassed, 1_000 + INTERVAL, INTERVAL);
        assert_eq!(s.reuse_decision(1_000 + INTERVAL + 1), SessionReuse::Reuse);
    }

    #[test]
    fn degraded_sessions_revalidate() {
        let mut s = session(0);
        s.apply(&SessionEvent::Stall, 1, INTERVAL);
        assert_eq!(s.reuse_decision(2), SessionReuse::Revalidate);
    }

    #[test]
    fn success_recorded_once() {
        let mut s = session(0);
        assert!(!s.record_position(10.0));
        assert!(s.record_position(61.0));
        assert!(!s.record_position(120.0));
        assert_eq!(s.position_secs, 120.0);
    }

    #[test]
    fn failure_kind_parsing() {
        assert_eq!("decode-error".parse::<FailureKind>().unwrap(), FailureKind::DecodeError);
        assert_eq!("ended_early".parse::<FailureKind>().unwrap(), FailureKind::EndedEarly);
        assert!("bored".parse::<FailureKind>().is_err());
    }

    #[test]
    fn health_stat_counters() {
        let hash: SourceHash = "0123456789abcdef0123456789abcdef01234567".parse().unwrap();
        let mut stat = SourceHealthStat::new(hash, 0);
        stat.record(PlaybackOutcome::Success, 1);
        stat.record(PlaybackOutcome::Failure(FailureKind::DecodeError), 2);
        stat.record(PlaybackOutcome::Failure(FailureKind::EndedEarly), 3);
        assert_eq!(stat.attempts(), 3);
        assert_eq!(stat.failures(), 2);
        assert_eq!(stat.updated_at, 3);
    }
}
