//! Read-path error types.

use eventide_core::error::DomainError;
use thiserror::Error;

use crate::dispatcher::Stage;

/// Failure reported by an event handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The read-model store rejected a write or read.
    #[error("read model error: {0}")]
    ReadModel(#[from] ReadModelError),

    /// An integration notification could not be published.
    #[error("notification failed: {0}")]
    Notification(String),

    /// Any other handler-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// A handler failed while an event was being dispatched. The remaining
/// handlers of the pipeline were not invoked.
#[derive(Debug, Error)]
#[error("handler {handler} failed in {stage} stage: {source}")]
pub struct DispatchError {
    /// Stage of the failing handler.
    pub stage: Stage,
    /// Name of the failing handler.
    pub handler: String,
    /// The handler's error.
    #[source]
    pub source: HandlerError,
}

/// Invalid handler registration, detected when the dispatcher is built.
#[derive(Debug, Error)]
pub enum DispatcherBuildError {
    /// A handler was registered for a kind the event type does not define.
    #[error("handler {handler} registered for unknown event kind {kind}")]
    UnknownEventKind {
        /// The offending handler.
        handler: String,
        /// The unknown kind.
        kind: String,
    },

    /// A handler was registered with an empty kind list.
    #[error("handler {0} registered for no event kinds")]
    NoKinds(String),
}

/// Read-model storage errors.
#[derive(Debug, Error)]
pub enum ReadModelError {
    /// A document could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backing store failed.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl From<sqlx::Error> for ReadModelError {
    fn from(err: sqlx::Error) -> Self {
        Self::Infrastructure(err.to_string())
    }
}

/// Errors starting or stopping a reconciler.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The event store refused the subscription.
    #[error(transparent)]
    Store(#[from] DomainError),

    /// The reconciler task panicked or was aborted.
    #[error("reconciler task failed: {0}")]
    Task(String),
}
