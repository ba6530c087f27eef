//! Liveness and dependency overview.

use axum::extract::State;
use axum::Json;
use rw_av::{HwAccelMode, ToolInfo};
use serde::Serialize;

use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub indexer_url: String,
    pub debrid: bool,
    pub tmdb: bool,
    pub subtitles: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub tools: Vec<ToolInfo>,
    pub transcode_mode: HwAccelMode,
    pub sessions_enabled: bool,
    pub providers: ProviderStatus,
}

fn configured(secret: &Option<String>) -> bool {
    secret.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// GET /api/health
pub async fn health(State(ctx): State<AppContext>) -> Result<Json<HealthResponse>, AppError> {
    let tools = ctx.tools.clone();
    let tools = tokio::task::spawn_blocking(move || tools.check_all())
        .await
        .map_err(|e| rw_core::Error::Internal(format!("tool check failed: {e}")))?;

    let providers = &ctx.config.providers;
    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tools,
        transcode_mode: ctx.transcode.current_mode(),
        sessions_enabled: ctx.sessions.enabled(),
        providers: ProviderStatus {
            indexer_url: providers.indexer_url.clone(),
            debrid: configured(&providers.debrid_token),
            tmdb: configured(&providers.tmdb_api_key),
            subtitles: ctx.subtitles.has_provider(),
        },
    }))
}
