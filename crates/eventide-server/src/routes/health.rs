//! Health check endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use eventide_core::aggregate::AggregateRoot;
use eventide_orders::domain::aggregates::Order;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the event store cannot be reached.
    pub status: &'static str,
    /// Service version.
    pub version: &'static str,
    /// Consumer group of the order reconciler.
    pub consumer_group: String,
    /// Last position the order reconciler has fully settled.
    pub checkpoint: Option<u64>,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let checkpoint = state
        .event_store
        .checkpoint(Order::AGGREGATE_TYPE, &state.consumer_group)
        .await;
    let (status, label, checkpoint) = match checkpoint {
        Ok(checkpoint) => (StatusCode::OK, "ok", checkpoint),
        Err(e) => {
            tracing::warn!(error = %e, "health check could not read checkpoint");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", None)
        }
    };
    (
        status,
        Json(HealthResponse {
            status: label,
            version: env!("CARGO_PKG_VERSION"),
            consumer_group: state.consumer_group,
            checkpoint,
        }),
    )
}

/// Returns the health check router.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
