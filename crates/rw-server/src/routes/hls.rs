//! On-demand HLS endpoints.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::query;
use super::streaming_helpers::serve_file_streaming;
use crate::context::AppContext;
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistQuery {
    pub input: String,
    #[serde(default)]
    pub audio_stream: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentQuery {
    pub input: String,
    pub index: u32,
    #[serde(default)]
    pub audio_stream: Option<u32>,
}

/// GET /api/hls/master.m3u8
pub async fn playlist(
    State(ctx): State<AppContext>,
    params: Result<Query<PlaylistQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query(params)?;
    let body = ctx.transcode.playlist(&params.input, params.audio_stream).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// GET /api/hls/segment.ts
pub async fn segment(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    params: Result<Query<SegmentQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query(params)?;
    let path = ctx
        .transcode
        .segment(&params.input, params.audio_stream, params.index)
        .await?;
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    Ok(serve_file_streaming(&path, "video/mp2t", range).await?)
}
