//! Eventide server library: configuration, state and the HTTP router.

pub mod config;
pub mod error;
pub mod notifications;
pub mod routes;
pub mod state;
pub mod telemetry;

use axum::Router;

use crate::state::AppState;

/// Builds the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/api/v1/orders", routes::orders::router())
        .nest("/api/v1/operator", routes::operator::router())
        .with_state(state)
}
