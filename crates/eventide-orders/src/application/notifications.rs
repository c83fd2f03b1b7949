//! Public notifications for order events.

use eventide_core::event::EventEnvelope;
use serde_json::{Value, json};

use crate::domain::events::OrderEvent;

/// Name of the integration handler publishing order notifications.
pub const ORDER_NOTIFICATIONS: &str = "order-notifications";

/// Maps an order event to its public payload. Deletions are not published.
#[must_use]
pub fn order_notifications(event: &EventEnvelope<OrderEvent>) -> Option<Value> {
    match &event.kind {
        OrderEvent::Created(created) => Some(json!({ "customer_id": created.customer_id })),
        OrderEvent::ItemAdded(added) => Some(json!({ "item": added.item })),
        OrderEvent::ItemRemoved(removed) => Some(json!({ "item": removed.item })),
        OrderEvent::Deleted => None,
    }
}
