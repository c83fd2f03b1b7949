//! Domain event abstractions.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type name for deserialization routing.
    pub event_type: String,
    /// Entity this event belongs to.
    pub entity_id: String,
    /// Zero-based version within the entity stream.
    pub entity_version: i64,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Trait implemented by the tagged event enum of an entity.
///
/// Every variant is a distinct event kind. `KINDS` lists all of them so that
/// handler registries can be validated once, at startup.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static
{
    /// Every event type name this enum can produce.
    const KINDS: &'static [&'static str];

    /// Returns the event type name (used for serialization routing).
    fn event_type(&self) -> &'static str;

    /// Builds the soft-delete tombstone event for `entity_id`.
    fn tombstone(entity_id: &str) -> Self;

    /// Returns `true` if this event is the soft-delete tombstone.
    fn is_tombstone(&self) -> bool;
}

/// A domain event together with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope<E> {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: E,
}

impl<E: DomainEvent> EventEnvelope<E> {
    /// Returns the event type name of the payload.
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Returns the entity version of this event.
    pub fn version(&self) -> i64 {
        self.metadata.entity_version
    }

    /// Returns `true` if the payload is the soft-delete tombstone.
    pub fn is_tombstone(&self) -> bool {
        self.kind.is_tombstone()
    }
}
