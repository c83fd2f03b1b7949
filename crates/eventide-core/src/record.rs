//! Persisted event records and stream naming.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Content type of JSON-encoded domain event payloads.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type of the tombstone marker written by a hard delete.
pub const TOMBSTONE_CONTENT_TYPE: &str = "application/vnd.eventide.tombstone";

/// Event type of the tombstone marker written by a hard delete.
pub const STREAM_DELETED_EVENT_TYPE: &str = "$streamDeleted";

/// Prefix of every system stream.
pub const SYSTEM_STREAM_PREFIX: char = '$';

/// Prefix of the stream a tombstone marker is written to.
pub const TOMBSTONE_STREAM_PREFIX: &str = "$$";

/// Builds a stream id of the form `{aggregate_type}-{entity_id}`.
#[must_use]
pub fn stream_id(aggregate_type: &str, entity_id: &str) -> String {
    format!("{aggregate_type}-{entity_id}")
}

/// Returns the category (aggregate type) a stream belongs to.
///
/// Leading `$` characters are stripped first, so a tombstone marker
/// `$$order-O1` belongs to the `order` category.
#[must_use]
pub fn category_of(stream_id: &str) -> &str {
    let bare = stream_id.trim_start_matches(SYSTEM_STREAM_PREFIX);
    bare.split_once('-').map_or(bare, |(category, _)| category)
}

/// Returns `true` for system streams, which never carry domain events.
#[must_use]
pub fn is_system_stream(stream_id: &str) -> bool {
    stream_id.starts_with(SYSTEM_STREAM_PREFIX)
}

/// Returns the stream id of the tombstone marker for `stream_id`.
#[must_use]
pub fn tombstone_stream_id(stream_id: &str) -> String {
    format!("{TOMBSTONE_STREAM_PREFIX}{stream_id}")
}

/// Version expectation for a conditional append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Append regardless of the current version.
    Any,
    /// The stream must not exist yet (version -1).
    NoStream,
    /// The stream must currently be at exactly this version.
    Exact(i64),
}

impl ExpectedVersion {
    /// Returns `true` if a stream at `current` (-1 when absent) satisfies this
    /// expectation.
    #[must_use]
    pub fn matches(self, current: i64) -> bool {
        match self {
            Self::Any => true,
            Self::NoStream => current == -1,
            Self::Exact(version) => current == version,
        }
    }
}

impl From<i64> for ExpectedVersion {
    fn from(version: i64) -> Self {
        if version < 0 {
            Self::NoStream
        } else {
            Self::Exact(version)
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::NoStream => f.write_str("-1"),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

/// Read direction within a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending offsets.
    Forward,
    /// Descending offsets.
    Backward,
}

/// Where a stream read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStart {
    /// The first event of the stream.
    Start,
    /// The last event of the stream.
    End,
    /// A specific zero-based offset (inclusive).
    Offset(i64),
}

/// Metadata persisted with every record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Version of the entity after this event.
    pub entity_version: i64,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
}

/// An encoded event ready to be appended to a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Unique event identifier; becomes the record id.
    pub event_id: Uuid,
    /// Event type name.
    pub event_type: String,
    /// Content type of `payload`.
    pub content_type: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
    /// Persisted metadata.
    pub metadata: RecordMetadata,
}

/// Persisted envelope of a domain event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Global log position, assigned at append time, starting at 1.
    pub position: u64,
    /// Unique record identifier (the event id).
    pub record_id: Uuid,
    /// Stream this record belongs to.
    pub stream_id: String,
    /// Category of the stream.
    pub category: String,
    /// Zero-based offset within the stream.
    pub offset: i64,
    /// Event type name.
    pub event_type: String,
    /// Content type of `payload`.
    pub content_type: String,
    /// Serialized payload.
    pub payload: Vec<u8>,
    /// Persisted metadata.
    pub metadata: RecordMetadata,
}

impl EventRecord {
    /// Returns `true` if this record lives in a system stream (tombstone
    /// markers and the like).
    #[must_use]
    pub fn is_system(&self) -> bool {
        is_system_stream(&self.stream_id)
    }

    /// For a tombstone marker written by a hard delete, the id of the
    /// deleted stream.
    #[must_use]
    pub fn deleted_stream(&self) -> Option<&str> {
        if self.event_type != STREAM_DELETED_EVENT_TYPE {
            return None;
        }
        self.stream_id.strip_prefix(TOMBSTONE_STREAM_PREFIX)
    }
}

/// A record handed to a subscriber, along with how often it was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredRecord {
    /// The delivered record.
    pub record: EventRecord,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
}

impl DeliveredRecord {
    /// Global position, used as the acknowledgement id.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.record.position
    }
}

/// A record that exhausted its retry budget and awaits operator attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkedRecord {
    /// Global position of the parked record.
    pub position: u64,
    /// Record identifier.
    pub record_id: Uuid,
    /// Stream of the parked record.
    pub stream_id: String,
    /// Event type of the parked record.
    pub event_type: String,
    /// How many times it was delivered before being parked.
    pub delivery_count: u32,
    /// Why it was parked.
    pub reason: String,
    /// When it was parked.
    pub parked_at: DateTime<Utc>,
}

impl ParkedRecord {
    /// Builds a parked record entry for `delivered`.
    #[must_use]
    pub fn new(delivered: &DeliveredRecord, reason: &str, parked_at: DateTime<Utc>) -> Self {
        Self {
            position: delivered.record.position,
            record_id: delivered.record.record_id,
            stream_id: delivered.record.stream_id.clone(),
            event_type: delivered.record.event_type.clone(),
            delivery_count: delivered.delivery_count,
            reason: reason.to_owned(),
            parked_at,
        }
    }
}
