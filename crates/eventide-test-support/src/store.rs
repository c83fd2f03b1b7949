//! Mock `EventStore` implementations for tests.

use std::sync::Arc;

use async_trait::async_trait;
use eventide_core::error::DomainError;
use eventide_core::record::{Direction, EventRecord, ExpectedVersion, NewEvent, ParkedRecord, ReadStart};
use eventide_core::store::{EventStore, Subscription};

/// An event store that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

fn refused() -> DomainError {
    DomainError::Infrastructure("connection refused".into())
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append(
        &self,
        _stream_id: &str,
        _expected: ExpectedVersion,
        _events: Vec<NewEvent>,
    ) -> Result<i64, DomainError> {
        Err(refused())
    }

    async fn read(
        &self,
        _stream_id: &str,
        _direction: Direction,
        _start: ReadStart,
        _count: Option<usize>,
    ) -> Result<Vec<EventRecord>, DomainError> {
        Err(refused())
    }

    async fn delete(&self, _stream_id: &str) -> Result<(), DomainError> {
        Err(refused())
    }

    async fn subscribe(
        &self,
        _category: &str,
        _consumer_group: &str,
    ) -> Result<Arc<dyn Subscription>, DomainError> {
        Err(refused())
    }

    async fn checkpoint(
        &self,
        _category: &str,
        _consumer_group: &str,
    ) -> Result<Option<u64>, DomainError> {
        Err(refused())
    }

    async fn parked_records(
        &self,
        _category: &str,
        _consumer_group: &str,
    ) -> Result<Vec<ParkedRecord>, DomainError> {
        Err(refused())
    }
}
