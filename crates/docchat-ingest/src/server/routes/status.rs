//! Status, queue and index statistics endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::{Error, Result};
use crate::processing::StatusMap;
use crate::providers::IndexStats;
use crate::server::state::AppState;
use crate::types::FileTask;

/// GET /api/status - Full status document
pub async fn list_status(State(state): State<AppState>) -> Json<StatusMap> {
    Json(state.status().load())
}

/// GET /api/status/:filename - One file's task
pub async fn get_status(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<FileTask>> {
    state
        .status()
        .get(&filename)
        .map(Json)
        .ok_or(Error::FileNotFound(filename))
}

/// POST /api/status/:filename/reset - Re-queue a file for processing
pub async fn reset_status(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<FileTask>> {
    if state.processor().is_claimed(&filename) {
        return Err(Error::Conflict(format!("{} is being processed", filename)));
    }

    let task = state
        .status()
        .reset(&filename, "Re-queued for processing by operator")
        .ok_or_else(|| Error::FileNotFound(filename.clone()))?;

    tracing::info!("Reset {} to pending", filename);
    Ok(Json(task))
}

/// GET /api/pending - Files the next scan would process
pub async fn list_pending(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.scanner().list_pending().await?))
}

/// GET /api/stats - Vector index statistics
pub async fn index_stats(State(state): State<AppState>) -> Result<Json<IndexStats>> {
    Ok(Json(state.vector_store().stats().await?))
}
