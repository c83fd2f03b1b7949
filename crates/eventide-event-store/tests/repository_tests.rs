//! `EventSourcingRepository` against the in-memory store.

use std::sync::Arc;

use eventide_core::aggregate::Aggregate;
use eventide_core::error::DomainError;
use eventide_core::record::{Direction, ReadStart};
use eventide_core::repository::{DeleteMode, EventSourcingRepository};
use eventide_core::store::EventStore;
use eventide_event_store::memory::InMemoryEventStore;
use eventide_test_support::{Counter, CounterEvent, FailingEventStore, FixedClock, fixed_time};
use uuid::Uuid;

fn repository(store: &InMemoryEventStore, mode: DeleteMode) -> EventSourcingRepository<Counter> {
    EventSourcingRepository::new(
        Arc::new(store.clone()),
        Arc::new(FixedClock::default()),
        mode,
    )
}

async fn seed(repo: &EventSourcingRepository<Counter>, id: &str) -> Aggregate<Counter> {
    let mut counter = Aggregate::<Counter>::new(id);
    counter
        .record(CounterEvent::Opened, Uuid::nil(), repo.clock())
        .unwrap();
    repo.add(&mut counter).await.unwrap();
    counter
}

#[tokio::test]
async fn test_add_persists_all_pending_events_and_returns_last_version() {
    // Arrange
    let store = InMemoryEventStore::new();
    let repo = repository(&store, DeleteMode::Soft);
    let mut counter = Aggregate::<Counter>::new("c1");
    let correlation_id = Uuid::new_v4();
    counter
        .record(CounterEvent::Opened, correlation_id, repo.clock())
        .unwrap();
    for n in 1..=4 {
        counter
            .record(CounterEvent::Incremented(n), correlation_id, repo.clock())
            .unwrap();
    }

    // Act
    let version = repo.add(&mut counter).await.unwrap();

    // Assert
    assert_eq!(version, 4);
    assert_eq!(counter.version(), 4);
    assert!(counter.pending_events().is_empty());
    let records = store
        .read("counter-c1", Direction::Forward, ReadStart::Start, None)
        .await
        .unwrap();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.metadata.correlation_id == correlation_id));
    assert!(records.iter().all(|r| r.metadata.occurred_at == fixed_time()));
}

#[tokio::test]
async fn test_get_rehydrates_state_and_version() {
    // Arrange
    let store = InMemoryEventStore::new();
    let repo = repository(&store, DeleteMode::Soft);
    let mut counter = seed(&repo, "c1").await;
    counter
        .record(CounterEvent::Incremented(2), Uuid::nil(), repo.clock())
        .unwrap();
    counter
        .record(CounterEvent::Incremented(3), Uuid::nil(), repo.clock())
        .unwrap();
    repo.update(&mut counter).await.unwrap();

    // Act
    let loaded = repo.get("c1").await.unwrap();

    // Assert
    assert_eq!(loaded.version(), 2);
    assert_eq!(loaded.state().total, 5);
    assert_eq!(loaded.state().increments, vec![2, 3]);
}

#[tokio::test]
async fn test_get_unknown_id_is_not_found() {
    let store = InMemoryEventStore::new();
    let repo = repository(&store, DeleteMode::Soft);

    let err = repo.get("missing").await.unwrap_err();

    assert!(matches!(err, DomainError::AggregateNotFound(id) if id == "missing"));
}

#[tokio::test]
async fn test_add_over_existing_stream_conflicts() {
    // Arrange
    let store = InMemoryEventStore::new();
    let repo = repository(&store, DeleteMode::Soft);
    seed(&repo, "c1").await;
    let mut duplicate = Aggregate::<Counter>::new("c1");
    duplicate
        .record(CounterEvent::Opened, Uuid::nil(), repo.clock())
        .unwrap();

    // Act
    let err = repo.add(&mut duplicate).await.unwrap_err();

    // Assert
    assert!(err.is_conflict());
    assert_eq!(duplicate.pending_events().len(), 1);
}

#[tokio::test]
async fn test_concurrent_update_conflicts_then_succeeds_after_reload() {
    // Arrange
    let store = InMemoryEventStore::new();
    let repo = repository(&store, DeleteMode::Soft);
    seed(&repo, "c1").await;
    let mut first = repo.get("c1").await.unwrap();
    let mut second = repo.get("c1").await.unwrap();
    first
        .record(CounterEvent::Incremented(1), Uuid::nil(), repo.clock())
        .unwrap();
    second
        .record(CounterEvent::Incremented(10), Uuid::nil(), repo.clock())
        .unwrap();
    repo.update(&mut first).await.unwrap();

    // Act
    let err = repo.update(&mut second).await.unwrap_err();

    // Assert
    assert!(matches!(
        err,
        DomainError::ConcurrencyConflict { actual: 1, .. }
    ));
    assert_eq!(second.pending_events().len(), 1);

    let mut reloaded = repo.get("c1").await.unwrap();
    reloaded
        .record(CounterEvent::Incremented(10), Uuid::nil(), repo.clock())
        .unwrap();
    assert_eq!(repo.update(&mut reloaded).await.unwrap(), 2);
    assert_eq!(repo.get("c1").await.unwrap().state().total, 11);
}

#[tokio::test]
async fn test_soft_delete_appends_tombstone_and_hides_aggregate() {
    // Arrange
    let store = InMemoryEventStore::new();
    let repo = repository(&store, DeleteMode::Soft);
    seed(&repo, "c1").await;

    // Act
    repo.remove("c1", Uuid::nil()).await.unwrap();

    // Assert
    assert!(matches!(
        repo.get("c1").await.unwrap_err(),
        DomainError::AggregateNotFound(_)
    ));
    let deleted = repo.get_including_deleted("c1").await.unwrap();
    assert!(deleted.is_deleted());
    assert_eq!(deleted.version(), 1);
    let last = store
        .read("counter-c1", Direction::Backward, ReadStart::End, Some(1))
        .await
        .unwrap();
    assert_eq!(last[0].event_type, "counter.closed");
}

#[tokio::test]
async fn test_soft_delete_twice_is_not_found() {
    let store = InMemoryEventStore::new();
    let repo = repository(&store, DeleteMode::Soft);
    seed(&repo, "c1").await;
    repo.remove("c1", Uuid::nil()).await.unwrap();

    let err = repo.remove("c1", Uuid::nil()).await.unwrap_err();

    assert!(matches!(err, DomainError::AggregateNotFound(_)));
}

#[tokio::test]
async fn test_hard_delete_removes_stream_and_blocks_recreation() {
    // Arrange
    let store = InMemoryEventStore::new();
    let repo = repository(&store, DeleteMode::Hard);
    seed(&repo, "c1").await;

    // Act
    repo.remove("c1", Uuid::nil()).await.unwrap();

    // Assert
    assert!(matches!(
        repo.get_including_deleted("c1").await.unwrap_err(),
        DomainError::AggregateNotFound(_)
    ));
    let mut again = Aggregate::<Counter>::new("c1");
    again
        .record(CounterEvent::Opened, Uuid::nil(), repo.clock())
        .unwrap();
    assert!(matches!(
        repo.add(&mut again).await.unwrap_err(),
        DomainError::StreamDeleted(_)
    ));
}

#[tokio::test]
async fn test_hard_delete_of_unknown_id_is_not_found() {
    let store = InMemoryEventStore::new();
    let repo = repository(&store, DeleteMode::Hard);

    let err = repo.remove("missing", Uuid::nil()).await.unwrap_err();

    assert!(matches!(err, DomainError::AggregateNotFound(_)));
}

#[tokio::test]
async fn test_store_failure_propagates_as_infrastructure_error() {
    let repo = EventSourcingRepository::<Counter>::new(
        Arc::new(FailingEventStore),
        Arc::new(FixedClock::default()),
        DeleteMode::Soft,
    );

    let err = repo.get("c1").await.unwrap_err();

    assert!(matches!(err, DomainError::Infrastructure(_)));
}
