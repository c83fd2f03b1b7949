//! Eventide server error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eventide_core::error::DomainError;
use eventide_reconciler::error::{DispatcherBuildError, ReconcileError};
use serde::Serialize;
use thiserror::Error;

/// Startup and runtime errors for the server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Tracing or OpenTelemetry setup failed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// The dispatcher could not be assembled.
    #[error("dispatcher error: {0}")]
    Dispatcher(#[from] DispatcherBuildError),

    /// The reconciler failed to start or stop.
    #[error("reconciler error: {0}")]
    Reconciler(#[from] ReconcileError),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer wrapper around `DomainError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self.0 {
            DomainError::AggregateNotFound(_) => (StatusCode::NOT_FOUND, "aggregate_not_found"),
            DomainError::StreamNotFound(_) => (StatusCode::NOT_FOUND, "stream_not_found"),
            DomainError::ConcurrencyConflict { .. } => {
                (StatusCode::CONFLICT, "concurrency_conflict")
            }
            DomainError::StreamDeleted(_) => (StatusCode::CONFLICT, "stream_deleted"),
            DomainError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
            DomainError::DeleteDisabled(_) => (StatusCode::METHOD_NOT_ALLOWED, "delete_disabled"),
            DomainError::NoPendingEvents(_) => (StatusCode::BAD_REQUEST, "no_pending_events"),
            DomainError::CorruptStream { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "corrupt_stream")
            }
            DomainError::Encoding(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encoding_error"),
            DomainError::Infrastructure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = ErrorBody {
            error: error_code,
            message: self.0.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
