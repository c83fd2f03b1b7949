//! In-process implementation of the `EventStore` trait.
//!
//! Holds the whole log in memory. Checkpoints and parked records live as long
//! as the store value, so a consumer group resumes where it left off when it
//! subscribes again against the same store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use eventide_core::error::DomainError;
use eventide_core::record::{
    self, Direction, EventRecord, ExpectedVersion, NewEvent, ParkedRecord, ReadStart,
    RecordMetadata, STREAM_DELETED_EVENT_TYPE, TOMBSTONE_CONTENT_TYPE,
};
use eventide_core::store::{EventStore, Subscription};
use tokio::sync::{RwLock, watch};
use uuid::Uuid;

use crate::subscription::{CategoryLog, HeadWatch, LogSubscription, SubscriptionSettings};

#[derive(Debug, Default)]
struct GroupState {
    checkpoint: Option<u64>,
    parked: Vec<ParkedRecord>,
}

#[derive(Debug, Default)]
struct Log {
    /// Slot `i` holds position `i + 1`; `None` once physically deleted.
    records: Vec<Option<EventRecord>>,
    /// Positions of each live stream, in offset order.
    streams: HashMap<String, Vec<u64>>,
    /// Hard-deleted streams; they cannot be written again.
    deleted: HashSet<String>,
    groups: HashMap<(String, String), GroupState>,
}

impl Log {
    fn head(&self) -> u64 {
        self.records.len() as u64
    }

    fn push(&mut self, mut record: EventRecord) -> u64 {
        let position = self.head() + 1;
        record.position = position;
        self.records.push(Some(record));
        position
    }

    fn get(&self, position: u64) -> Option<&EventRecord> {
        let index = usize::try_from(position.checked_sub(1)?).ok()?;
        self.records.get(index)?.as_ref()
    }

    #[allow(clippy::cast_possible_wrap)]
    fn stream_version(&self, stream_id: &str) -> i64 {
        self.streams
            .get(stream_id)
            .map_or(-1, |positions| positions.len() as i64 - 1)
    }
}

#[derive(Debug)]
struct Inner {
    log: RwLock<Log>,
    head: watch::Sender<u64>,
    settings: SubscriptionSettings,
}

/// In-memory event store.
#[derive(Debug, Clone)]
pub struct InMemoryEventStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Creates an empty store with default subscription settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(SubscriptionSettings::default())
    }

    /// Creates an empty store with the given subscription settings.
    #[must_use]
    pub fn with_settings(settings: SubscriptionSettings) -> Self {
        let (head, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                log: RwLock::new(Log::default()),
                head,
                settings,
            }),
        }
    }

    /// Returns every live record in the global log, system records included.
    pub async fn all_records(&self) -> Vec<EventRecord> {
        self.inner
            .log
            .read()
            .await
            .records
            .iter()
            .flatten()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<i64, DomainError> {
        if events.is_empty() {
            return Err(DomainError::Validation(format!(
                "cannot append an empty batch to {stream_id}"
            )));
        }
        let mut log = self.inner.log.write().await;
        if log.deleted.contains(stream_id) {
            return Err(DomainError::StreamDeleted(stream_id.to_owned()));
        }
        let current = log.stream_version(stream_id);
        if !expected.matches(current) {
            return Err(DomainError::ConcurrencyConflict {
                stream_id: stream_id.to_owned(),
                expected,
                actual: current,
            });
        }

        let category = record::category_of(stream_id).to_owned();
        let mut offset = current;
        for event in events {
            offset += 1;
            let position = log.push(EventRecord {
                position: 0,
                record_id: event.event_id,
                stream_id: stream_id.to_owned(),
                category: category.clone(),
                offset,
                event_type: event.event_type,
                content_type: event.content_type,
                payload: event.payload,
                metadata: event.metadata,
            });
            log.streams
                .entry(stream_id.to_owned())
                .or_default()
                .push(position);
        }
        let head = log.head();
        drop(log);
        self.inner.head.send_replace(head);

        tracing::debug!(stream_id, version = offset, "appended to in-memory stream");
        Ok(offset)
    }

    async fn read(
        &self,
        stream_id: &str,
        direction: Direction,
        start: ReadStart,
        count: Option<usize>,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let log = self.inner.log.read().await;
        let positions = log
            .streams
            .get(stream_id)
            .ok_or_else(|| DomainError::StreamNotFound(stream_id.to_owned()))?;
        let stream: Vec<&EventRecord> = positions.iter().filter_map(|p| log.get(*p)).collect();
        let last = log.stream_version(stream_id);
        let from = match start {
            ReadStart::Start => 0,
            ReadStart::End => last,
            ReadStart::Offset(offset) => offset,
        };
        let limit = count.unwrap_or(usize::MAX);

        let records = match direction {
            Direction::Forward => stream
                .into_iter()
                .filter(|r| r.offset >= from)
                .take(limit)
                .cloned()
                .collect(),
            Direction::Backward => stream
                .into_iter()
                .rev()
                .filter(|r| r.offset <= from)
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(records)
    }

    async fn delete(&self, stream_id: &str) -> Result<(), DomainError> {
        let mut log = self.inner.log.write().await;
        let positions = log
            .streams
            .remove(stream_id)
            .ok_or_else(|| DomainError::StreamNotFound(stream_id.to_owned()))?;
        #[allow(clippy::cast_possible_wrap)]
        let last_version = positions.len() as i64 - 1;
        for position in &positions {
            if let Some(slot) = usize::try_from(*position - 1)
                .ok()
                .and_then(|index| log.records.get_mut(index))
            {
                *slot = None;
            }
        }
        log.deleted.insert(stream_id.to_owned());

        let marker = record::tombstone_stream_id(stream_id);
        let position = log.push(EventRecord {
            position: 0,
            record_id: Uuid::new_v4(),
            stream_id: marker.clone(),
            category: record::category_of(stream_id).to_owned(),
            offset: 0,
            event_type: STREAM_DELETED_EVENT_TYPE.to_owned(),
            content_type: TOMBSTONE_CONTENT_TYPE.to_owned(),
            payload: Vec::new(),
            metadata: RecordMetadata {
                entity_version: last_version,
                occurred_at: Utc::now(),
                correlation_id: Uuid::nil(),
                causation_id: Uuid::nil(),
            },
        });
        log.streams.insert(marker, vec![position]);
        let head = log.head();
        drop(log);
        self.inner.head.send_replace(head);

        tracing::info!(stream_id, removed = positions.len(), "hard deleted in-memory stream");
        Ok(())
    }

    async fn subscribe(
        &self,
        category: &str,
        consumer_group: &str,
    ) -> Result<Arc<dyn Subscription>, DomainError> {
        let checkpoint = self.checkpoint(category, consumer_group).await?;
        Ok(Arc::new(LogSubscription::new(
            Arc::new(self.clone()),
            category,
            consumer_group,
            checkpoint,
            self.inner.settings,
        )))
    }

    async fn checkpoint(
        &self,
        category: &str,
        consumer_group: &str,
    ) -> Result<Option<u64>, DomainError> {
        let log = self.inner.log.read().await;
        Ok(log
            .groups
            .get(&(category.to_owned(), consumer_group.to_owned()))
            .and_then(|group| group.checkpoint))
    }

    async fn parked_records(
        &self,
        category: &str,
        consumer_group: &str,
    ) -> Result<Vec<ParkedRecord>, DomainError> {
        let log = self.inner.log.read().await;
        Ok(log
            .groups
            .get(&(category.to_owned(), consumer_group.to_owned()))
            .map(|group| group.parked.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CategoryLog for InMemoryEventStore {
    async fn scan(
        &self,
        category: &str,
        from: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let log = self.inner.log.read().await;
        let start = usize::try_from(from.saturating_sub(1)).unwrap_or(usize::MAX);
        Ok(log
            .records
            .iter()
            .skip(start)
            .flatten()
            .filter(|r| r.category == category)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn store_checkpoint(
        &self,
        category: &str,
        consumer_group: &str,
        position: u64,
    ) -> Result<(), DomainError> {
        let mut log = self.inner.log.write().await;
        let group = log
            .groups
            .entry((category.to_owned(), consumer_group.to_owned()))
            .or_default();
        group.checkpoint = group.checkpoint.max(Some(position));
        Ok(())
    }

    async fn store_parked(
        &self,
        category: &str,
        consumer_group: &str,
        parked: ParkedRecord,
    ) -> Result<(), DomainError> {
        let mut log = self.inner.log.write().await;
        log.groups
            .entry((category.to_owned(), consumer_group.to_owned()))
            .or_default()
            .parked
            .push(parked);
        Ok(())
    }

    fn watch_head(&self) -> HeadWatch {
        HeadWatch::Changes(self.inner.head.subscribe())
    }
}
