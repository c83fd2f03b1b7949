//! The order summary read model.

use std::sync::Arc;

use async_trait::async_trait;
use eventide_core::event::EventEnvelope;
use eventide_reconciler::dispatcher::{EventHandler, StreamDeleted};
use eventide_reconciler::error::{HandlerError, ReadModelError};
use eventide_reconciler::read_model::ReadModelStore;
use serde::{Deserialize, Serialize};

use crate::domain::events::OrderEvent;

/// Read-model collection holding [`OrderSummary`] documents.
pub const ORDERS_COLLECTION: &str = "orders";

/// Denormalized view of one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    /// Order identifier.
    pub id: String,
    /// Customer placing the order.
    pub customer_id: Option<String>,
    /// Items in the order.
    pub items: Vec<String>,
    /// Entity version of the last event applied.
    pub version: i64,
}

impl OrderSummary {
    fn empty(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            customer_id: None,
            items: Vec::new(),
            version: -1,
        }
    }
}

/// Projection maintaining [`OrderSummary`] documents.
///
/// Applying an event at or below the stored version is a no-op, so
/// redelivered records leave the document unchanged.
pub struct OrderSummaryProjection {
    store: Arc<dyn ReadModelStore>,
}

impl OrderSummaryProjection {
    /// Creates a projection writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ReadModelStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler<OrderEvent> for OrderSummaryProjection {
    fn name(&self) -> &str {
        "order-summary"
    }

    async fn handle(&self, event: &EventEnvelope<OrderEvent>) -> Result<(), HandlerError> {
        let id = &event.metadata.entity_id;
        let mut summary = match self.store.get(ORDERS_COLLECTION, id).await? {
            Some(document) => serde_json::from_value(document)
                .map_err(|e| HandlerError::Failed(format!("unreadable order summary {id}: {e}")))?,
            None => OrderSummary::empty(id),
        };
        if event.version() <= summary.version {
            tracing::debug!(order_id = %id, version = event.version(), "order summary already applied");
            return Ok(());
        }

        match &event.kind {
            OrderEvent::Created(created) => summary.customer_id = Some(created.customer_id.clone()),
            OrderEvent::ItemAdded(added) => summary.items.push(added.item.clone()),
            OrderEvent::ItemRemoved(removed) => summary.items.retain(|item| item != &removed.item),
            OrderEvent::Deleted => {
                self.store.delete(ORDERS_COLLECTION, id).await?;
                return Ok(());
            }
        }
        summary.version = event.version();

        let document = serde_json::to_value(&summary).map_err(ReadModelError::from)?;
        self.store.upsert(ORDERS_COLLECTION, id, document).await?;
        Ok(())
    }

    async fn stream_deleted(&self, deleted: &StreamDeleted) -> Result<(), HandlerError> {
        tracing::debug!(order_id = %deleted.entity_id, "removing summary of hard-deleted order");
        self.store.delete(ORDERS_COLLECTION, &deleted.entity_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use eventide_core::event::{DomainEvent, EventMetadata};
    use eventide_reconciler::read_model::InMemoryReadModelStore;
    use eventide_test_support::fixed_time;
    use uuid::Uuid;

    use super::*;
    use crate::domain::events::{ItemAdded, OrderCreated};

    fn envelope(version: i64, kind: OrderEvent) -> EventEnvelope<OrderEvent> {
        EventEnvelope {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                event_type: kind.event_type().to_owned(),
                entity_id: "O1".into(),
                entity_version: version,
                correlation_id: Uuid::new_v4(),
                causation_id: Uuid::nil(),
                occurred_at: fixed_time(),
            },
            kind,
        }
    }

    fn created() -> OrderEvent {
        OrderEvent::Created(OrderCreated {
            customer_id: "C1".into(),
        })
    }

    fn added(item: &str) -> OrderEvent {
        OrderEvent::ItemAdded(ItemAdded { item: item.into() })
    }

    async fn summary(store: &InMemoryReadModelStore) -> Option<OrderSummary> {
        store
            .get(ORDERS_COLLECTION, "O1")
            .await
            .unwrap()
            .map(|document| serde_json::from_value(document).unwrap())
    }

    #[tokio::test]
    async fn test_created_then_item_added_builds_summary() {
        // Arrange
        let store = Arc::new(InMemoryReadModelStore::new());
        let projection = OrderSummaryProjection::new(store.clone());

        // Act
        projection.handle(&envelope(0, created())).await.unwrap();
        projection.handle(&envelope(1, added("X"))).await.unwrap();

        // Assert
        let summary = summary(&store).await.unwrap();
        assert_eq!(summary.items, vec!["X".to_owned()]);
        assert_eq!(summary.customer_id.as_deref(), Some("C1"));
        assert_eq!(summary.version, 1);
    }

    #[tokio::test]
    async fn test_redelivered_event_is_ignored() {
        // Arrange
        let store = Arc::new(InMemoryReadModelStore::new());
        let projection = OrderSummaryProjection::new(store.clone());
        let item = envelope(1, added("X"));
        projection.handle(&envelope(0, created())).await.unwrap();
        projection.handle(&item).await.unwrap();

        // Act
        projection.handle(&item).await.unwrap();

        // Assert
        assert_eq!(summary(&store).await.unwrap().items, vec!["X".to_owned()]);
    }

    #[tokio::test]
    async fn test_deleted_removes_summary() {
        let store = Arc::new(InMemoryReadModelStore::new());
        let projection = OrderSummaryProjection::new(store.clone());
        projection.handle(&envelope(0, created())).await.unwrap();

        projection.handle(&envelope(1, OrderEvent::Deleted)).await.unwrap();

        assert_eq!(summary(&store).await, None);
    }

    #[tokio::test]
    async fn test_hard_deleted_stream_removes_summary() {
        // Arrange
        let store = Arc::new(InMemoryReadModelStore::new());
        let projection = OrderSummaryProjection::new(store.clone());
        projection.handle(&envelope(0, created())).await.unwrap();
        let deleted = StreamDeleted {
            stream_id: "order-O1".into(),
            entity_id: "O1".into(),
            last_version: 0,
        };

        // Act
        projection.stream_deleted(&deleted).await.unwrap();

        // Assert
        assert_eq!(summary(&store).await, None);
    }
}
