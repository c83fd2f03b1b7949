//! JSON codec between domain events and event records.

use thiserror::Error;

use crate::error::DomainError;
use crate::event::{DomainEvent, EventEnvelope, EventMetadata};
use crate::record::{EventRecord, JSON_CONTENT_TYPE, NewEvent, RecordMetadata};

/// Why a record could not be turned back into a domain event.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The record lives in a system stream and carries no domain event.
    #[error("record in system stream {0} is not a domain event")]
    SystemRecord(String),

    /// The payload is not JSON.
    #[error("unsupported content type {content_type} for event {event_type}")]
    UnsupportedContentType {
        /// Declared content type.
        content_type: String,
        /// Declared event type.
        event_type: String,
    },

    /// The payload did not deserialize into the event enum.
    #[error("malformed payload for event {event_type}: {source}")]
    Malformed {
        /// Declared event type.
        event_type: String,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },

    /// The payload decoded into a different kind than the record declares.
    #[error("record declares event type {declared} but payload is {actual}")]
    KindMismatch {
        /// Event type stored on the record.
        declared: String,
        /// Event type of the decoded payload.
        actual: &'static str,
    },
}

/// Encodes a domain event for appending.
///
/// # Errors
///
/// Returns `DomainError::Encoding` if the payload cannot be serialized.
pub fn encode<E: DomainEvent>(event: &EventEnvelope<E>) -> Result<NewEvent, DomainError> {
    let payload = serde_json::to_vec(&event.kind)
        .map_err(|e| DomainError::Encoding(format!("event serialization failed: {e}")))?;
    let meta = &event.metadata;
    Ok(NewEvent {
        event_id: meta.event_id,
        event_type: event.event_type().to_owned(),
        content_type: JSON_CONTENT_TYPE.to_owned(),
        payload,
        metadata: RecordMetadata {
            entity_version: meta.entity_version,
            occurred_at: meta.occurred_at,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
        },
    })
}

/// Decodes a record into a domain event.
///
/// `entity_id` is derived from the stream id (everything after the first `-`).
///
/// # Errors
///
/// Returns a `DecodeError` for system records, non-JSON payloads, malformed
/// payloads, or payloads whose kind disagrees with the record's event type.
pub fn decode<E: DomainEvent>(record: &EventRecord) -> Result<EventEnvelope<E>, DecodeError> {
    if record.is_system() {
        return Err(DecodeError::SystemRecord(record.stream_id.clone()));
    }
    if record.content_type != JSON_CONTENT_TYPE {
        return Err(DecodeError::UnsupportedContentType {
            content_type: record.content_type.clone(),
            event_type: record.event_type.clone(),
        });
    }
    let kind: E =
        serde_json::from_slice(&record.payload).map_err(|source| DecodeError::Malformed {
            event_type: record.event_type.clone(),
            source,
        })?;
    if kind.event_type() != record.event_type {
        return Err(DecodeError::KindMismatch {
            declared: record.event_type.clone(),
            actual: kind.event_type(),
        });
    }
    let entity_id = record
        .stream_id
        .split_once('-')
        .map_or(record.stream_id.as_str(), |(_, id)| id);
    Ok(EventEnvelope {
        metadata: EventMetadata {
            event_id: record.record_id,
            event_type: record.event_type.clone(),
            entity_id: entity_id.to_owned(),
            entity_version: record.metadata.entity_version,
            correlation_id: record.metadata.correlation_id,
            causation_id: record.metadata.causation_id,
            occurred_at: record.metadata.occurred_at,
        },
        kind,
    })
}
