//! rw-server: HTTP API, resolution coordinator, caches and transcoding.
//!
//! This crate ties together all other rw-* crates into a running server
//! application. It provides:
//!
//! - Axum-based HTTP API for resolution, playback and subtitles
//! - Single-flight resolution over a two-tier (memory + SQLite) cache
//! - Playback sessions and per-source health tracking
//! - On-demand HLS and live remux through managed ffmpeg processes
//! - A periodic sweeper and graceful shutdown via signal handling

pub mod cache;
pub mod context;
pub mod error;
pub mod middleware;
pub mod resolve;
pub mod router;
pub mod routes;
pub mod sessions;
pub mod subtitles;
pub mod sweeper;
pub mod transcode;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rw_av::{FfprobeProber, MediaProber, ToolRegistry};
use rw_core::config::Config;
use rw_source::{AddonIndexer, RealDebridClient, TmdbClient};
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::resolve::Providers;

/// Build the production providers from configuration.
pub fn providers_from_config(config: &Config, tools: &ToolRegistry) -> Providers {
    let timeout = Duration::from_secs(config.providers.request_timeout_secs);
    let playback = &config.playback;

    let indexer = Arc::new(AddonIndexer::new(config.providers.indexer_url.clone(), timeout));
    let reifier = Arc::new(
        RealDebridClient::new(
            &config.providers.debrid_base_url,
            config.providers.debrid_token.clone().unwrap_or_default(),
            timeout,
        )
        .with_timings(
            Duration::from_secs(playback.torrent_ready_secs),
            Duration::from_secs(1),
            Duration::from_secs(playback.verify_timeout_secs),
        ),
    );
    if !reifier.is_configured() {
        tracing::warn!("No debrid token configured; resolution will fail until one is set");
    }

    let ffprobe = tools
        .require("ffprobe")
        .map(|t| t.path.clone())
        .unwrap_or_else(|_| "ffprobe".into());
    let prober: Arc<dyn MediaProber> = Arc::new(FfprobeProber::new(ffprobe).with_timeout(timeout));

    let tmdb = config
        .providers
        .tmdb_api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .map(|key| Arc::new(TmdbClient::new(key, timeout)));

    Providers {
        indexer,
        reifier,
        prober,
        tmdb,
    }
}

/// Start the reelway server.
///
/// Initializes the database, discovers tools, builds the [`AppContext`],
/// spawns the sweeper, and serves HTTP until a shutdown signal arrives.
pub async fn start(config: Config) -> rw_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    // Initialize database.
    let db_path = &config.server.db_path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created database directory {}", parent.display());
        }
    }
    let db = rw_db::pool::init_pool(db_path)?;
    if existed {
        tracing::info!("Database opened (existing) at {}", db_path.display());
    } else {
        tracing::info!("Database created (new) at {}", db_path.display());
    }

    // Discover external tools.
    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    for info in tools.check_all() {
        if info.available {
            tracing::info!(
                "Tool found: {} ({})",
                info.name,
                info.version.as_deref().unwrap_or("unknown version")
            );
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let providers = providers_from_config(&config, &tools);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| rw_core::Error::Configuration(format!("Invalid server address: {e}")))?;
    let static_dir = config.server.static_dir.clone();

    let ctx = AppContext::build(config, db, tools, providers)?;
    ctx.transcode.refresh_capabilities(true).await;

    let cancel = CancellationToken::new();

    let sweeper_ctx = ctx.clone();
    let sweeper_cancel = cancel.clone();
    let sweeper_handle = tokio::spawn(async move {
        sweeper::run_sweeper(sweeper_ctx, sweeper_cancel).await;
    });

    let app = router::build_router(ctx.clone(), static_dir);

    tracing::info!("Starting server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| rw_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await?;

    // Signal background tasks and stop transcoders.
    cancel.cancel();
    let _ = sweeper_handle.await;
    ctx.transcode.stop_all().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM) or cancellation.
pub async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
