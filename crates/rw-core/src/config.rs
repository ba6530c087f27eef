//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, upstream providers, tools, transcoding,
//! playback tracking and cache policy. Every section defaults sensibly so a
//! completely empty `{}` file is valid. Environment variables are layered on
//! top via [`Config::apply_env`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub providers: ProvidersConfig,
    pub tools: ToolsConfig,
    pub transcode: TranscodeConfig,
    pub playback: PlaybackConfig,
    pub cache: CacheConfig,
    pub native_player: NativePlayerConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Overlay values from process environment variables.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup function. Split out from
    /// [`Config::apply_env`] so tests do not mutate the process environment.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = non_empty("REELWAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("REELWAY_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(db) = non_empty("REELWAY_DB_PATH") {
            self.server.db_path = PathBuf::from(db);
        }
        if let Some(token) = non_empty("REAL_DEBRID_TOKEN") {
            self.providers.debrid_token = Some(token);
        }
        if let Some(key) = non_empty("TMDB_API_KEY") {
            self.providers.tmdb_api_key = Some(key);
        }
        if let Some(key) = non_empty("OPENSUBTITLES_API_KEY") {
            self.providers.opensubtitles_api_key = Some(key);
        }
        if let Some(url) = non_empty("REELWAY_INDEXER_URL") {
            self.providers.indexer_url = url;
        }
        if let Some(mode) = non_empty("REELWAY_HW_ACCEL") {
            self.transcode.hw_accel = mode;
        }
        if let Some(flag) = non_empty("REELWAY_AUTO_AUDIO_SYNC").and_then(|v| parse_flag(&v)) {
            self.transcode.auto_audio_sync = flag;
        }
        if let Some(flag) = non_empty("REELWAY_PLAYBACK_SESSIONS").and_then(|v| parse_flag(&v)) {
            self.playback.sessions_enabled = flag;
        }
        if let Some(path) = non_empty("REELWAY_NATIVE_PLAYER") {
            self.native_player.binary_path = Some(PathBuf::from(path));
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.providers.debrid_token.is_none() {
            warnings.push(
                "providers.debrid_token is not set; resolve endpoints will fail".into(),
            );
        }

        if self.providers.indexer_url.is_empty() {
            warnings.push("providers.indexer_url is empty".into());
        }

        let valid = ["none", "auto", "videotoolbox", "nvenc", "vaapi", "qsv"];
        if !valid.contains(&self.transcode.hw_accel.as_str()) {
            warnings.push(format!(
                "transcode.hw_accel '{}' is not a recognized method (valid: {})",
                self.transcode.hw_accel,
                valid.join(", ")
            ));
        }

        if self.transcode.segment_duration_secs == 0 {
            warnings.push("transcode.segment_duration_secs is 0; using 6".into());
        }

        if let Some(ref path) = self.native_player.binary_path {
            if !path.exists() {
                warnings.push(format!(
                    "native_player.binary_path {} does not exist",
                    path.display()
                ));
            }
        }

        warnings
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub db_path: PathBuf,
    /// Root for on-disk caches (HLS segments, extracted subtitles).
    pub cache_dir: PathBuf,
    /// Base URL clients use to reach this server; playback URLs returned by
    /// the resolve endpoints are relative when unset.
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8787,
            static_dir: None,
            db_path: PathBuf::from("./data/reelway.db"),
            cache_dir: PathBuf::from("./data/cache"),
            public_base_url: None,
        }
    }
}

/// Upstream provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Stream indexer (Stremio addon style) base URL.
    pub indexer_url: String,
    /// Debrid provider REST base URL.
    pub debrid_base_url: String,
    pub debrid_token: Option<String>,
    pub tmdb_api_key: Option<String>,
    pub opensubtitles_api_key: Option<String>,
    pub opensubtitles_base_url: String,
    /// Outbound request timeout applied to provider clients.
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            indexer_url: "https://torrentio.strem.fun".into(),
            debrid_base_url: "https://api.real-debrid.com/rest/1.0".into(),
            debrid_token: None,
            tmdb_api_key: None,
            opensubtitles_api_key: None,
            opensubtitles_base_url: "https://api.opensubtitles.com/api/v1".into(),
            request_timeout_secs: 20,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Transcoding defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Hardware acceleration method (none, auto, videotoolbox, nvenc, vaapi, qsv).
    pub hw_accel: String,
    #[serde(default = "default_segment_duration")]
    pub segment_duration_secs: u32,
    pub idle_timeout_secs: u64,
    pub finished_grace_secs: u64,
    pub segment_wait_secs: u64,
    /// Estimate an audio offset from stream start times when remuxing.
    pub auto_audio_sync: bool,
    /// Clamp applied to the automatic audio offset, in milliseconds.
    pub max_auto_sync_ms: i64,
    pub audio_bitrate: String,
    /// How often hardware encoders are re-detected.
    pub capability_refresh_secs: u64,
}

fn default_segment_duration() -> u32 {
    6
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            hw_accel: "none".into(),
            segment_duration_secs: default_segment_duration(),
            idle_timeout_secs: 120,
            finished_grace_secs: 300,
            segment_wait_secs: 30,
            auto_audio_sync: true,
            max_auto_sync_ms: 1500,
            audio_bitrate: "192k".into(),
            capability_refresh_secs: 1800,
        }
    }
}

impl TranscodeConfig {
    /// Segment duration with the zero guard applied.
    pub fn effective_segment_duration(&self) -> u32 {
        if self.segment_duration_secs == 0 {
            default_segment_duration()
        } else {
            self.segment_duration_secs
        }
    }
}

/// Playback session and source health tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sessions_enabled: bool,
    /// Lazy revalidation cadence for a healthy session.
    pub validation_interval_secs: u64,
    /// Total budget for one resolution (ranking + reification).
    pub resolve_budget_secs: u64,
    /// Budget for one debrid torrent to reach "downloaded".
    pub torrent_ready_secs: u64,
    /// Budget for one reachability probe.
    pub verify_timeout_secs: u64,
    /// Candidates handed to the reifier, highest first.
    pub max_candidates: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sessions_enabled: true,
            validation_interval_secs: 90,
            resolve_budget_secs: 90,
            torrent_ready_secs: 18,
            verify_timeout_secs: 8,
            max_candidates: 10,
        }
    }
}

/// Cache TTLs and in-memory caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub quick_start_ttl_secs: u64,
    pub resolved_stream_ttl_secs: u64,
    /// Revalidation cadence for debrid-hosted (ephemeral) URLs.
    pub ephemeral_validation_secs: u64,
    pub metadata_ttl_secs: u64,
    pub media_probe_ttl_secs: u64,
    pub session_ttl_secs: u64,
    pub source_health_stale_secs: u64,
    pub subtitle_file_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub memory_max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quick_start_ttl_secs: 3600,
            resolved_stream_ttl_secs: 6 * 3600,
            ephemeral_validation_secs: 600,
            metadata_ttl_secs: 24 * 3600,
            media_probe_ttl_secs: 7 * 24 * 3600,
            session_ttl_secs: 14 * 24 * 3600,
            source_health_stale_secs: 30 * 24 * 3600,
            subtitle_file_ttl_secs: 7 * 24 * 3600,
            sweep_interval_secs: 60,
            memory_max_entries: 512,
        }
    }
}

/// Native (desktop) player launcher, reachable only from loopback clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NativePlayerConfig {
    pub binary_path: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8787);
        assert_eq!(cfg.transcode.segment_duration_secs, 6);
        assert_eq!(cfg.playback.validation_interval_secs, 90);
        assert_eq!(cfg.cache.quick_start_ttl_secs, 3600);
        assert!(cfg.playback.sessions_enabled);
    }

    #[test]
    fn missing_debrid_token_warns() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("debrid_token")));
    }

    #[test]
    fn unknown_hw_accel_warns() {
        let mut cfg = Config::default();
        cfg.providers.debrid_token = Some("t".into());
        cfg.transcode.hw_accel = "quantum".into();
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("quantum")));
    }

    #[test]
    fn parse_json_config() {
        let json = r#"{"server": {"port": 9090}, "transcode": {"hw_accel": "vaapi"}}"#;
        let cfg = Config::from_json(json).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.transcode.hw_accel, "vaapi");
        assert_eq!(cfg.transcode.segment_duration_secs, 6);
    }

    #[test]
    fn parse_empty_json_uses_defaults() {
        let cfg = Config::from_json("{}").unwrap();
        assert_eq!(cfg.server.port, 8787);
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/reelway.json")));
        assert_eq!(cfg.server.port, 8787);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("REELWAY_PORT", "9999"),
            ("REAL_DEBRID_TOKEN", "abc"),
            ("REELWAY_HW_ACCEL", "nvenc"),
            ("REELWAY_AUTO_AUDIO_SYNC", "off"),
            ("REELWAY_PLAYBACK_SESSIONS", "0"),
            ("TMDB_API_KEY", "  "),
        ]);
        let mut cfg = Config::default();
        cfg.apply_env_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.providers.debrid_token.as_deref(), Some("abc"));
        assert_eq!(cfg.transcode.hw_accel, "nvenc");
        assert!(!cfg.transcode.auto_audio_sync);
        assert!(!cfg.playback.sessions_enabled);
        assert!(cfg.providers.tmdb_api_key.is_none(), "blank values are ignored");
    }

    #[test]
    fn zero_segment_duration_falls_back() {
        let mut cfg = TranscodeConfig::default();
        cfg.segment_duration_secs = 0;
        assert_eq!(cfg.effective_segment_duration(), 6);
    }
}
