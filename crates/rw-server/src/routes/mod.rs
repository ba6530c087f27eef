//! Route handlers for the HTTP API.

pub mod config;
pub mod debug;
pub mod health;
pub mod hls;
pub mod native;
pub mod preferences;
pub mod remux;
pub mod resolve;
pub mod session;
pub mod streaming_helpers;
pub mod subtitles;

use axum::extract::rejection::QueryRejection;
use axum::extract::Query;

use crate::error::AppError;

/// Unwrap a query extraction, turning a rejection into a JSON 400.
pub(crate) fn query<T>(extracted: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    extracted
        .map(|Query(value)| value)
        .map_err(|e| rw_core::Error::Validation(e.body_text()).into())
}

/// `None` for a missing or blank parameter.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
