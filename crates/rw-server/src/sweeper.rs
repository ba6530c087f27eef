//! Periodic housekeeping.
//!
//! One loop prunes expired cache and session rows, reaps idle or finished
//! transcode jobs, drops stale subtitle files and refreshes the hardware
//! encoder list when it is due.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Run one sweep. Failures are logged, never propagated.
pub async fn sweep_once(ctx: &AppContext) {
    let cache = ctx.cache.clone();
    match tokio::task::spawn_blocking(move || cache.prune(rw_core::now_ms())).await {
        Ok(Ok(stats)) if stats.total() > 0 => {
            tracing::info!(
                resolved_streams = stats.resolved_streams,
                quick_start = stats.quick_start,
                metadata = stats.metadata,
                sessions = stats.playback_sessions,
                media_probes = stats.media_probes,
                source_health = stats.source_health,
                "Pruned expired rows"
            );
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "Cache prune failed"),
        Err(e) => tracing::warn!(error = %e, "Cache prune task panicked"),
    }

    let reaped = ctx.transcode.reap().await;
    if reaped > 0 {
        tracing::debug!(reaped, "Reaped transcode jobs");
    }

    let subtitles = ctx.subtitles.clone();
    match tokio::task::spawn_blocking(move || subtitles.prune_files()).await {
        Ok(0) => {}
        Ok(removed) => tracing::debug!(removed, "Removed stale subtitle files"),
        Err(e) => tracing::warn!(error = %e, "Subtitle prune task panicked"),
    }

    ctx.transcode.refresh_capabilities(false).await;
}

/// Sweep every `cache.sweep_interval_secs` until cancelled.
pub async fn run_sweeper(ctx: AppContext, cancel: CancellationToken) {
    let interval = Duration::from_secs(ctx.config.cache.sweep_interval_secs.max(1));
    tracing::info!(interval_secs = interval.as_secs(), "Sweeper started");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => break,
        }
        sweep_once(&ctx).await;
    }

    tracing::info!("Sweeper stopped");
}
