//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression,
//! per-route body limits and all endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Headroom on top of the poster limit for the other multipart fields.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Body limit for JSON batches posted to /ingest.
const INGEST_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Allow the dashboard on the configured port plus port+1 for a dev server.
    let port = state.config.general.port;
    let dev_port = port.saturating_add(1);
    let origins: Vec<HeaderValue> = [port, dev_port]
        .iter()
        .flat_map(|p| {
            [
                format!("http://127.0.0.1:{}", p),
                format!("http://localhost:{}", p),
            ]
        })
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    let upload_limit = state.config.storage.max_poster_bytes + FORM_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/movies",
            get(handlers::list_movies).post(handlers::create_movie),
        )
        .route(
            "/movies/{id}",
            get(handlers::get_movie)
                .put(handlers::update_movie)
                .delete(handlers::delete_movie)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/movies/{id}/poster", get(handlers::get_poster))
        .route(
            "/search/poster",
            post(handlers::search_poster).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/recommendations", post(handlers::recommendations))
        .route(
            "/ingest",
            post(handlers::ingest).layer(DefaultBodyLimit::max(INGEST_BODY_LIMIT)),
        )
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
