//! Live remux to fragmented MP4.

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::query;
use crate::context::AppContext;
use crate::error::AppError;
use crate::transcode::RemuxRequest;

static X_AUDIO_SYNC_MS: HeaderName = HeaderName::from_static("x-audio-sync-ms");
static X_AUDIO_AUTO_SYNC_MS: HeaderName = HeaderName::from_static("x-audio-auto-sync-ms");
static X_AUDIO_FILTER: HeaderName = HeaderName::from_static("x-audio-filter");

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemuxQuery {
    pub input: String,
    #[serde(default)]
    pub start: Option<f64>,
    #[serde(default)]
    pub audio_stream: Option<u32>,
    #[serde(default)]
    pub subtitle_stream: Option<u32>,
    #[serde(default)]
    pub audio_sync_ms: Option<i64>,
}

/// GET /api/remux
///
/// The body streams until ffmpeg exits; a client disconnect drops the body
/// and with it the ffmpeg process.
pub async fn remux(
    State(ctx): State<AppContext>,
    params: Result<Query<RemuxQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let params = query(params)?;
    let stream = ctx
        .transcode
        .remux(RemuxRequest {
            input: params.input,
            start_secs: params.start.filter(|s| s.is_finite() && *s > 0.0),
            audio_index: params.audio_stream,
            subtitle_index: params.subtitle_stream,
            manual_sync_ms: params.audio_sync_ms.unwrap_or(0),
        })
        .await?;

    let sync = stream.sync;
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "video/mp4"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        Body::from_stream(stream),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(X_AUDIO_SYNC_MS.clone(), HeaderValue::from(sync.total_ms()));
    headers.insert(X_AUDIO_AUTO_SYNC_MS.clone(), HeaderValue::from(sync.auto_ms));
    if let Some(filter) = sync.filter().and_then(|f| HeaderValue::from_str(&f).ok()) {
        headers.insert(X_AUDIO_FILTER.clone(), filter);
    }
    Ok(response)
}
