//! Axum router construction.
//!
//! Builds the full application router with all route groups, middleware
//! layers, and static file serving.

use std::path::PathBuf;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::loopback::loopback_only;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    // Launches processes on this host: loopback peers only.
    let local_routes = Router::new()
        .route("/native/play", post(routes::native::play))
        .layer(middleware::from_fn(loopback_only));

    let api = Router::new()
        // Resolution
        .route("/resolve/movie", get(routes::resolve::resolve_movie))
        .route("/resolve/tv", get(routes::resolve::resolve_tv))
        .route("/resolve/sources", get(routes::resolve::list_sources))
        .route(
            "/title/preferences",
            get(routes::preferences::get_preference)
                .post(routes::preferences::set_preference)
                .delete(routes::preferences::delete_preference),
        )
        .route("/session/progress", post(routes::session::report_progress))
        // Playback
        .route("/hls/master.m3u8", get(routes::hls::playlist))
        .route("/hls/segment.ts", get(routes::hls::segment))
        .route("/remux", get(routes::remux::remux))
        .route("/subtitles.vtt", get(routes::subtitles::internal))
        .route("/subtitles.external.vtt", get(routes::subtitles::external))
        // Operations
        .route("/debug/cache", get(routes::debug::cache))
        .route("/health", get(routes::health::health))
        .route("/config", get(routes::config::get_config))
        .merge(local_routes);

    let mut app = Router::new()
        .nest("/api", api)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    // Static file serving for the player UI.
    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            let index_path = dir.join("index.html");
            app = app.fallback_service(
                tower_http::services::ServeDir::new(&dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(tower_http::services::ServeFile::new(index_path)),
            );
        } else {
            tracing::warn!("Static directory {:?} does not exist; not serving files", dir);
        }
    }

    app
}
