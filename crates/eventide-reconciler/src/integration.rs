//! Integration notifications derived from domain events.
//!
//! An [`IntegrationEmitter`] maps domain events to [`IntegrationEvent`]s and
//! publishes them on a [`NotificationSink`]. Records may be delivered more
//! than once, so `message_id` is the originating event id and subscribers
//! deduplicate on it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventide_core::event::{DomainEvent, EventEnvelope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dispatcher::EventHandler;
use crate::error::HandlerError;

/// Message published to external subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent {
    /// Id of the originating domain event; stable across redeliveries.
    pub message_id: Uuid,
    /// Event type of the originating domain event.
    pub event_type: String,
    /// Entity the event belongs to.
    pub entity_id: String,
    /// Entity version of the originating event.
    pub entity_version: i64,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// When the originating event occurred.
    pub occurred_at: DateTime<Utc>,
    /// Public payload.
    pub data: Value,
}

impl IntegrationEvent {
    /// Builds the integration event for `event` with the given public payload.
    #[must_use]
    pub fn from_envelope<E: DomainEvent>(event: &EventEnvelope<E>, data: Value) -> Self {
        let meta = &event.metadata;
        Self {
            message_id: meta.event_id,
            event_type: meta.event_type.clone(),
            entity_id: meta.entity_id.clone(),
            entity_version: meta.entity_version,
            correlation_id: meta.correlation_id,
            occurred_at: meta.occurred_at,
            data,
        }
    }
}

/// Destination for integration events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Publishes one integration event.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::Notification` if the event could not be handed
    /// off.
    async fn publish(&self, event: IntegrationEvent) -> Result<(), HandlerError>;
}

/// In-process fan-out of integration events over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotificationSink {
    sender: broadcast::Sender<IntegrationEvent>,
}

impl BroadcastNotificationSink {
    /// Creates a sink buffering up to `capacity` events per slow subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<IntegrationEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotificationSink {
    async fn publish(&self, event: IntegrationEvent) -> Result<(), HandlerError> {
        let message_id = event.message_id;
        match self.sender.send(event) {
            Ok(receivers) => {
                tracing::debug!(%message_id, receivers, "published integration event");
            }
            Err(_) => {
                tracing::trace!(%message_id, "no integration subscribers");
            }
        }
        Ok(())
    }
}

/// Maps a domain event to its public payload, or `None` when the event is not
/// published.
pub type IntegrationMapper<E> = fn(&EventEnvelope<E>) -> Option<Value>;

/// Handler that publishes mapped domain events.
pub struct IntegrationEmitter<E: DomainEvent> {
    name: String,
    sink: Arc<dyn NotificationSink>,
    mapper: IntegrationMapper<E>,
}

impl<E: DomainEvent> IntegrationEmitter<E> {
    /// Creates an emitter publishing through `sink`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        sink: Arc<dyn NotificationSink>,
        mapper: IntegrationMapper<E>,
    ) -> Self {
        Self {
            name: name.into(),
            sink,
            mapper,
        }
    }
}

#[async_trait]
impl<E: DomainEvent> EventHandler<E> for IntegrationEmitter<E> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &EventEnvelope<E>) -> Result<(), HandlerError> {
        match (self.mapper)(event) {
            Some(data) => {
                self.sink
                    .publish(IntegrationEvent::from_envelope(event, data))
                    .await
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use eventide_core::event::EventMetadata;
    use eventide_test_support::{CounterEvent, fixed_time};
    use serde_json::json;

    use super::*;

    fn envelope(kind: CounterEvent) -> EventEnvelope<CounterEvent> {
        EventEnvelope {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: kind.event_type().to_owned(),
                entity_id: "c1".into(),
                entity_version: 3,
                correlation_id: Uuid::new_v4(),
                causation_id: Uuid::nil(),
                occurred_at: fixed_time(),
            },
            kind,
        }
    }

    fn increments_only(event: &EventEnvelope<CounterEvent>) -> Option<Value> {
        match event.kind {
            CounterEvent::Incremented(n) => Some(json!({ "by": n })),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_emitter_publishes_mapped_event_with_stable_message_id() {
        // Arrange
        let sink = BroadcastNotificationSink::new(8);
        let mut receiver = sink.subscribe();
        let emitter = IntegrationEmitter::new("counter-feed", Arc::new(sink), increments_only);
        let event = envelope(CounterEvent::Incremented(2));

        // Act
        emitter.handle(&event).await.unwrap();

        // Assert
        let published = receiver.recv().await.unwrap();
        assert_eq!(published.message_id, event.metadata.event_id);
        assert_eq!(published.event_type, "counter.incremented");
        assert_eq!(published.entity_id, "c1");
        assert_eq!(published.entity_version, 3);
        assert_eq!(published.data, json!({ "by": 2 }));
    }

    #[tokio::test]
    async fn test_unmapped_events_are_not_published() {
        let sink = BroadcastNotificationSink::new(8);
        let mut receiver = sink.subscribe();
        let emitter = IntegrationEmitter::new("counter-feed", Arc::new(sink), increments_only);

        emitter.handle(&envelope(CounterEvent::Opened)).await.unwrap();

        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let sink = BroadcastNotificationSink::new(8);

        let event = IntegrationEvent::from_envelope(&envelope(CounterEvent::Opened), json!({}));

        assert!(sink.publish(event).await.is_ok());
    }
}
