//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`rw_core::Error`] so that route handlers
//! can return `Result<T, AppError>` and use `?` on core results.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::middleware::request_id::current_request_id;

/// Wrapper so we can implement `IntoResponse` for an external type.
pub struct AppError {
    inner: rw_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: rw_core::Error) -> Self {
        Self {
            inner,
            request_id: current_request_id(),
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }
}

impl From<rw_core::Error> for AppError {
    fn from(e: rw_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_produces_404() {
        let err = AppError::new(rw_core::Error::not_found("segment", "42"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn upstream_produces_502() {
        let err = AppError::new(rw_core::Error::upstream("debrid", "every candidate failed"));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn with_request_id() {
        let err = AppError::new(rw_core::Error::Internal("oops".into()))
            .with_request_id("req-123".into());
        assert_eq!(err.request_id.as_deref(), Some("req-123"));
    }
}
