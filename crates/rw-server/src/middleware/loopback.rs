//! Guard for endpoints that act on the host machine.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;

/// Reject any request whose peer address is not a loopback address.
///
/// Requires the server to be run with
/// `into_make_service_with_connect_info::<SocketAddr>()`; without connection
/// info every request is rejected.
pub async fn loopback_only(request: Request<axum::body::Body>, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    match peer {
        Some(addr) if addr.ip().is_loopback() => next.run(request).await,
        Some(addr) => {
            tracing::warn!(peer = %addr, path = %request.uri().path(), "Rejected non-loopback request");
            AppError::new(rw_core::Error::Forbidden("loopback clients only".into())).into_response()
        }
        None => AppError::new(rw_core::Error::Forbidden("peer address unknown".into())).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/", post(|| async { "ok" }))
            .layer(axum::middleware::from_fn(loopback_only))
    }

    fn request(peer: Option<&str>) -> Request<axum::body::Body> {
        let mut req = Request::builder()
            .method("POST")
            .uri("/")
            .body(axum::body::Body::empty())
            .unwrap();
        if let Some(peer) = peer {
            req.extensions_mut()
                .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        }
        req
    }

    #[tokio::test]
    async fn loopback_peer_passes() {
        let resp = app().oneshot(request(Some("127.0.0.1:5000"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = app().oneshot(request(Some("[::1]:5000"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn remote_or_unknown_peer_is_forbidden() {
        let resp = app().oneshot(request(Some("192.168.1.20:5000"))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = app().oneshot(request(None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
