//! Service-oriented application context.
//!
//! [`AppContext`] is the central struct shared across all route handlers via
//! Axum state. Every service owns its own key space and is wrapped in an
//! `Arc`, so cloning the context is cheap.

use std::sync::Arc;
use std::time::Duration;

use rw_av::ToolRegistry;
use rw_core::config::Config;
use rw_db::pool::{get_conn, DbPool, PooledConnection};

use crate::cache::CacheStore;
use crate::resolve::{Providers, Resolver};
use crate::sessions::SessionTracker;
use crate::subtitles::{OpenSubtitlesClient, SubtitleService};
use crate::transcode::TranscodeManager;

/// Application context shared by all request handlers (via Axum state).
#[derive(Clone)]
pub struct AppContext {
    /// Database connection pool.
    pub db: DbPool,
    /// Immutable configuration snapshot.
    pub config: Arc<Config>,
    /// External tool registry.
    pub tools: Arc<ToolRegistry>,
    pub cache: Arc<CacheStore>,
    pub sessions: Arc<SessionTracker>,
    pub resolver: Arc<Resolver>,
    pub transcode: Arc<TranscodeManager>,
    pub subtitles: Arc<SubtitleService>,
}

impl AppContext {
    /// Wire every service from the configuration and the given providers.
    ///
    /// Creates `server.cache_dir` if needed and wipes the HLS work
    /// directory inside it.
    pub fn build(config: Config, db: DbPool, tools: Arc<ToolRegistry>, providers: Providers) -> rw_core::Result<Self> {
        std::fs::create_dir_all(&config.server.cache_dir)?;

        let cache = Arc::new(CacheStore::new(db.clone(), config.cache.clone()));
        let sessions = Arc::new(SessionTracker::new(db.clone(), &config.playback, &config.cache));

        let timeout = Duration::from_secs(config.providers.request_timeout_secs);
        let subtitle_client = config
            .providers
            .opensubtitles_api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .map(|key| OpenSubtitlesClient::new(&config.providers.opensubtitles_base_url, key, timeout));
        let subtitles = Arc::new(SubtitleService::new(
            Arc::clone(&tools),
            subtitle_client,
            &config.server.cache_dir,
            Duration::from_secs(config.cache.subtitle_file_ttl_secs),
            timeout,
        ));

        let transcode = Arc::new(TranscodeManager::new(
            Arc::clone(&tools),
            Arc::clone(&providers.prober),
            Arc::clone(&cache),
            config.transcode.clone(),
            &config.server.cache_dir,
        )?);

        let resolver = Arc::new(Resolver::new(
            providers,
            Arc::clone(&cache),
            Arc::clone(&sessions),
            Arc::clone(&subtitles),
            Duration::from_secs(config.playback.resolve_budget_secs),
            config.playback.max_candidates,
        ));

        Ok(Self {
            db,
            config: Arc::new(config),
            tools,
            cache,
            sessions,
            resolver,
            transcode,
            subtitles,
        })
    }

    /// Run a query on the blocking pool with a pooled connection.
    pub async fn with_db<T, F>(&self, f: F) -> rw_core::Result<T>
    where
        F: FnOnce(&PooledConnection) -> rw_core::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&get_conn(&db)?))
            .await
            .map_err(|e| rw_core::Error::Internal(format!("database task failed: {e}")))?
    }
}
