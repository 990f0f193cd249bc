//! CineMatch API crate - axum HTTP server and route handlers.
//!
//! Exposes the catalog (list, create, edit, delete, poster download),
//! poster similarity search, embedding recommendations, batch ingestion
//! and a health check.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
