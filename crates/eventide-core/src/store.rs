//! Event store and subscription contracts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DomainError;
use crate::record::{
    DeliveredRecord, Direction, EventRecord, ExpectedVersion, NewEvent, ParkedRecord, ReadStart,
};

/// Append-only durable log keyed by stream id.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to `stream_id` if the stream's current version
    /// satisfies `expected`. Returns the new stream version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` when the expectation does
    /// not hold, `DomainError::StreamDeleted` for hard-deleted streams and
    /// `DomainError::Validation` for an empty batch.
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<i64, DomainError>;

    /// Reads records of one stream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamNotFound` if the stream does not exist.
    async fn read(
        &self,
        stream_id: &str,
        direction: Direction,
        start: ReadStart,
        count: Option<usize>,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Physically removes a stream and leaves a tombstone marker in its
    /// category.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::StreamNotFound` if the stream does not exist.
    async fn delete(&self, stream_id: &str) -> Result<(), DomainError>;

    /// Opens a durable subscription to every stream of `category`, resuming
    /// after the consumer group's checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the checkpoint cannot be read.
    async fn subscribe(
        &self,
        category: &str,
        consumer_group: &str,
    ) -> Result<Arc<dyn Subscription>, DomainError>;

    /// Returns the stored checkpoint of a consumer group.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on storage failure.
    async fn checkpoint(
        &self,
        category: &str,
        consumer_group: &str,
    ) -> Result<Option<u64>, DomainError>;

    /// Lists the records a consumer group has parked.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` on storage failure.
    async fn parked_records(
        &self,
        category: &str,
        consumer_group: &str,
    ) -> Result<Vec<ParkedRecord>, DomainError>;
}

/// A durable, checkpointed source of records for one consumer group.
///
/// Records are delivered at least once. A record is never delivered while an
/// earlier record of the same stream is still unsettled; records of different
/// streams carry no relative ordering guarantee.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// The category this subscription reads.
    fn category(&self) -> &str;

    /// The consumer group this subscription belongs to.
    fn consumer_group(&self) -> &str;

    /// Waits for the next deliverable record. Returns `None` once closed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the log cannot be read.
    async fn next(&self) -> Result<Option<DeliveredRecord>, DomainError>;

    /// Acknowledges a delivered record.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the record is not in flight and
    /// `DomainError::Infrastructure` if the checkpoint cannot be stored.
    async fn ack(&self, position: u64) -> Result<(), DomainError>;

    /// Leaves a delivered record unacknowledged and schedules its redelivery
    /// after `retry_after`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the record is not in flight.
    async fn nack(&self, position: u64, retry_after: Duration) -> Result<(), DomainError>;

    /// Moves a delivered record aside for operator inspection. It is treated
    /// as settled for checkpointing and ordering.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the record is not in flight and
    /// `DomainError::Infrastructure` if the parked entry cannot be stored.
    async fn park(&self, delivered: &DeliveredRecord, reason: &str) -> Result<(), DomainError>;

    /// The highest position up to which every record is settled.
    async fn checkpoint(&self) -> Option<u64>;

    /// Stops delivery; pending and future `next` calls return `None`.
    fn close(&self);
}
