//! API routes for the ingestion server

pub mod ingest;
pub mod status;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        // Upload - with larger body limit for file uploads
        .route(
            "/ingest",
            post(ingest::ingest_file).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        // Status document
        .route("/status", get(status::list_status))
        .route("/status/:filename", get(status::get_status))
        .route("/status/:filename/reset", post(status::reset_status))
        // Queue and index
        .route("/pending", get(status::list_pending))
        .route("/stats", get(status::index_stats))
}
