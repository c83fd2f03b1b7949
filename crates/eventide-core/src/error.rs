//! Domain error types.

use thiserror::Error;

use crate::record::ExpectedVersion;

/// Top-level error type for the write path and the event store contract.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was not found (never created, or soft deleted).
    #[error("aggregate not found: {0}")]
    AggregateNotFound(String),

    /// A stream does not exist in the event store.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// The stream was hard deleted and can no longer be written.
    #[error("stream has been deleted: {0}")]
    StreamDeleted(String),

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_id: String,
        /// The version the writer expected.
        expected: ExpectedVersion,
        /// The actual version found.
        actual: i64,
    },

    /// A save was attempted on an aggregate without pending events.
    #[error("aggregate {0} has no pending events")]
    NoPendingEvents(String),

    /// Removal attempted while the repository's delete mode is disabled.
    #[error("deletion is disabled for aggregate {0}")]
    DeleteDisabled(String),

    /// Stored events could not be folded into a consistent aggregate.
    #[error("corrupt stream {stream_id}: {reason}")]
    CorruptStream {
        /// The offending stream.
        stream_id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// An event could not be encoded or decoded on the write path.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` for errors a caller can resolve by reloading and
    /// retrying the command.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Returns `true` for both flavours of "nothing there".
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AggregateNotFound(_) | Self::StreamNotFound(_))
    }
}
