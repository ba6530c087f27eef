//! WebVTT subtitle endpoints.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;

use super::query;
use super::streaming_helpers::serve_file_streaming;
use crate::context::AppContext;
use crate::error::AppError;

const VTT: &str = "text/vtt; charset=utf-8";

#[derive(Debug, Deserialize)]
pub struct InternalQuery {
    pub input: String,
    pub stream: u32,
}

#[derive(Debug, Deserialize)]
pub struct ExternalQuery {
    /// Download URL or provider reference handed out by a resolution.
    pub url: String,
}

/// GET /api/subtitles.vtt
pub async fn internal(
    State(ctx): State<AppContext>,
    params: Result<Query<InternalQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query(params)?;
    let path = ctx.subtitles.internal_vtt(&params.input, params.stream).await?;
    Ok(serve_file_streaming(&path, VTT, None).await?)
}

/// GET /api/subtitles.external.vtt
pub async fn external(
    State(ctx): State<AppContext>,
    params: Result<Query<ExternalQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query(params)?;
    let path = ctx.subtitles.external_vtt(&params.url).await?;
    Ok(serve_file_streaming(&path, VTT, None).await?)
}
