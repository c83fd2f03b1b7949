//! Operator inspection of consumer groups.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use eventide_core::record::ParkedRecord;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

/// Stored checkpoint of a consumer group.
#[derive(Debug, Serialize)]
pub struct CheckpointResponse {
    /// Category the group consumes.
    pub category: String,
    /// The consumer group.
    pub consumer_group: String,
    /// Last settled position; `null` before anything was settled.
    pub checkpoint: Option<u64>,
}

/// GET /{category}/{group}/parked
async fn parked_records(
    State(state): State<AppState>,
    Path((category, group)): Path<(String, String)>,
) -> Result<Json<Vec<ParkedRecord>>, ApiError> {
    let parked = state.event_store.parked_records(&category, &group).await?;
    Ok(Json(parked))
}

/// GET /{category}/{group}/checkpoint
async fn checkpoint(
    State(state): State<AppState>,
    Path((category, group)): Path<(String, String)>,
) -> Result<Json<CheckpointResponse>, ApiError> {
    let checkpoint = state.event_store.checkpoint(&category, &group).await?;
    Ok(Json(CheckpointResponse {
        category,
        consumer_group: group,
        checkpoint,
    }))
}

/// Returns the operator router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{category}/{group}/parked", get(parked_records))
        .route("/{category}/{group}/checkpoint", get(checkpoint))
}
