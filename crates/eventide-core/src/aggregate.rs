//! Aggregate roots and rehydration.

use std::fmt::Debug;

use uuid::Uuid;

use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{DomainEvent, EventEnvelope, EventMetadata};
use crate::record;

/// Trait for entity state that is folded from its event history.
pub trait AggregateRoot: Debug + Send + Sync + Sized + 'static {
    /// The event type this entity produces and consumes.
    type Event: DomainEvent;

    /// Aggregate type name; the category part of the stream id.
    const AGGREGATE_TYPE: &'static str;

    /// Creates the blank entity. Every field must be initialised here;
    /// rehydration always starts from this value.
    fn new(id: &str) -> Self;

    /// Apply an event to mutate internal state.
    fn apply(&mut self, event: &Self::Event);
}

/// In-memory entity with its persisted version and pending events.
#[derive(Debug)]
pub struct Aggregate<R: AggregateRoot> {
    id: String,
    /// Version of the last persisted event; -1 when nothing is persisted.
    version: i64,
    deleted: bool,
    /// Uncommitted events pending persistence, in emission order.
    pending: Vec<EventEnvelope<R::Event>>,
    state: R,
}

impl<R: AggregateRoot> Aggregate<R> {
    /// Creates a blank aggregate that has never been persisted.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let state = R::new(&id);
        Self {
            id,
            version: -1,
            deleted: false,
            pending: Vec::new(),
            state,
        }
    }

    /// Returns the aggregate identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the stream id the aggregate is persisted to.
    #[must_use]
    pub fn stream_id(&self) -> String {
        record::stream_id(R::AGGREGATE_TYPE, &self.id)
    }

    /// Returns the persisted version (-1 before the first save).
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns the materialized state, including pending events.
    #[must_use]
    pub fn state(&self) -> &R {
        &self.state
    }

    /// Returns `true` once a tombstone event has been applied.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Returns the uncommitted events in emission order.
    #[must_use]
    pub fn pending_events(&self) -> &[EventEnvelope<R::Event>] {
        &self.pending
    }

    #[allow(clippy::cast_possible_wrap)]
    fn next_version(&self) -> i64 {
        self.version + self.pending.len() as i64 + 1
    }

    /// Records a new event: stamps its metadata, applies it to the state and
    /// queues it for persistence.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the aggregate is already deleted.
    pub fn record(
        &mut self,
        kind: R::Event,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<&EventEnvelope<R::Event>, DomainError> {
        if self.deleted {
            return Err(DomainError::Validation(format!(
                "{} {} has been deleted",
                R::AGGREGATE_TYPE,
                self.id
            )));
        }
        let event = EventEnvelope {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: kind.event_type().to_owned(),
                entity_id: self.id.clone(),
                entity_version: self.next_version(),
                correlation_id,
                causation_id: correlation_id,
                occurred_at: clock.now(),
            },
            kind,
        };
        self.fold(&event);
        self.pending.push(event);
        Ok(&self.pending[self.pending.len() - 1])
    }

    fn fold(&mut self, event: &EventEnvelope<R::Event>) {
        if event.is_tombstone() {
            self.deleted = true;
        }
        self.state.apply(&event.kind);
    }

    /// Marks all pending events as persisted: the version moves to the last
    /// pending event's version and the pending list is cleared.
    pub(crate) fn mark_committed(&mut self) -> i64 {
        if let Some(last) = self.pending.last() {
            self.version = last.metadata.entity_version;
        }
        self.pending.clear();
        self.version
    }
}

/// Folds an ordered event list into an aggregate.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if `events` is empty and
/// `DomainError::CorruptStream` if versions do not increase by one from 0.
pub fn rehydrate<R: AggregateRoot>(
    id: &str,
    events: Vec<EventEnvelope<R::Event>>,
) -> Result<Aggregate<R>, DomainError> {
    if events.is_empty() {
        return Err(DomainError::AggregateNotFound(id.to_owned()));
    }
    let mut aggregate = Aggregate::<R>::new(id);
    for event in events {
        let expected = aggregate.version + 1;
        if event.version() != expected {
            return Err(DomainError::CorruptStream {
                stream_id: aggregate.stream_id(),
                reason: format!(
                    "expected event version {expected}, found {}",
                    event.version()
                ),
            });
        }
        aggregate.fold(&event);
        aggregate.version = event.version();
    }
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug)]
    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap())
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum TallyEvent {
        Opened,
        Counted(u32),
        Closed,
    }

    impl DomainEvent for TallyEvent {
        const KINDS: &'static [&'static str] = &["tally.opened", "tally.counted", "tally.closed"];

        fn event_type(&self) -> &'static str {
            match self {
                Self::Opened => "tally.opened",
                Self::Counted(_) => "tally.counted",
                Self::Closed => "tally.closed",
            }
        }

        fn tombstone(_entity_id: &str) -> Self {
            Self::Closed
        }

        fn is_tombstone(&self) -> bool {
            matches!(self, Self::Closed)
        }
    }

    #[derive(Debug)]
    struct Tally {
        id: String,
        total: u32,
        marks: Vec<u32>,
    }

    impl AggregateRoot for Tally {
        type Event = TallyEvent;
        const AGGREGATE_TYPE: &'static str = "tally";

        fn new(id: &str) -> Self {
            Self {
                id: id.to_owned(),
                total: 0,
                marks: Vec::new(),
            }
        }

        fn apply(&mut self, event: &Self::Event) {
            if let TallyEvent::Counted(n) = event {
                self.total += n;
                self.marks.push(*n);
            }
        }
    }

    fn history(kinds: Vec<TallyEvent>) -> Vec<EventEnvelope<TallyEvent>> {
        let mut aggregate = Aggregate::<Tally>::new("t1");
        for kind in kinds {
            aggregate.record(kind, Uuid::nil(), &clock()).unwrap();
        }
        aggregate.pending_events().to_vec()
    }

    #[test]
    fn test_new_aggregate_starts_blank() {
        let aggregate = Aggregate::<Tally>::new("t1");

        assert_eq!(aggregate.id(), "t1");
        assert_eq!(aggregate.state().id, "t1");
        assert_eq!(aggregate.version(), -1);
        assert!(aggregate.pending_events().is_empty());
        assert!(aggregate.state().marks.is_empty());
        assert!(!aggregate.is_deleted());
        assert_eq!(aggregate.stream_id(), "tally-t1");
    }

    #[test]
    fn test_record_assigns_consecutive_versions_from_zero() {
        let events = history(vec![
            TallyEvent::Opened,
            TallyEvent::Counted(2),
            TallyEvent::Counted(3),
        ]);

        let versions: Vec<i64> = events.iter().map(EventEnvelope::version).collect();
        assert_eq!(versions, vec![0, 1, 2]);
        assert_eq!(events[1].metadata.entity_id, "t1");
        assert_eq!(events[1].metadata.event_type, "tally.counted");
    }

    #[test]
    fn test_record_applies_to_state_immediately() {
        let mut aggregate = Aggregate::<Tally>::new("t1");

        aggregate
            .record(TallyEvent::Counted(4), Uuid::nil(), &clock())
            .unwrap();

        assert_eq!(aggregate.state().total, 4);
        assert_eq!(aggregate.version(), -1);
    }

    #[test]
    fn test_rehydrate_folds_in_order_and_sets_version() {
        let events = history(vec![
            TallyEvent::Opened,
            TallyEvent::Counted(2),
            TallyEvent::Counted(5),
        ]);

        let aggregate = rehydrate::<Tally>("t1", events).unwrap();

        assert_eq!(aggregate.version(), 2);
        assert_eq!(aggregate.state().marks, vec![2, 5]);
        assert!(aggregate.pending_events().is_empty());
    }

    #[test]
    fn test_rehydrate_empty_history_is_not_found() {
        let err = rehydrate::<Tally>("t1", vec![]).unwrap_err();

        assert!(matches!(err, DomainError::AggregateNotFound(id) if id == "t1"));
    }

    #[test]
    fn test_rehydrate_rejects_version_gap() {
        let mut events = history(vec![TallyEvent::Opened, TallyEvent::Counted(1)]);
        events[1].metadata.entity_version = 3;

        let err = rehydrate::<Tally>("t1", events).unwrap_err();

        assert!(matches!(err, DomainError::CorruptStream { .. }));
    }

    #[test]
    fn test_tombstone_marks_deleted_and_blocks_recording() {
        let events = history(vec![TallyEvent::Opened, TallyEvent::Closed]);
        let mut aggregate = rehydrate::<Tally>("t1", events).unwrap();

        assert!(aggregate.is_deleted());
        let err = aggregate
            .record(TallyEvent::Counted(1), Uuid::nil(), &clock())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn test_mark_committed_advances_version_and_clears_pending() {
        let mut aggregate = Aggregate::<Tally>::new("t1");
        aggregate.record(TallyEvent::Opened, Uuid::nil(), &clock()).unwrap();
        aggregate
            .record(TallyEvent::Counted(1), Uuid::nil(), &clock())
            .unwrap();

        let version = aggregate.mark_committed();

        assert_eq!(version, 1);
        assert_eq!(aggregate.version(), 1);
        assert!(aggregate.pending_events().is_empty());
    }
}
