//! Domain events for the Orders context.

use eventide_core::event::DomainEvent;
use serde::{Deserialize, Serialize};

/// Event type for `OrderEvent::Created`.
pub const ORDER_CREATED_EVENT_TYPE: &str = "order.created";
/// Event type for `OrderEvent::ItemAdded`.
pub const ITEM_ADDED_EVENT_TYPE: &str = "order.item_added";
/// Event type for `OrderEvent::ItemRemoved`.
pub const ITEM_REMOVED_EVENT_TYPE: &str = "order.item_removed";
/// Event type for `OrderEvent::Deleted`.
pub const ORDER_DELETED_EVENT_TYPE: &str = "order.deleted";

/// Emitted when an order is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    /// Customer placing the order.
    pub customer_id: String,
}

/// Emitted when an item is added to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    /// The item.
    pub item: String,
}

/// Emitted when an item is removed from an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    /// The item.
    pub item: String,
}

/// Event payload variants for the Orders context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    /// The order has been created.
    Created(OrderCreated),
    /// An item has been added.
    ItemAdded(ItemAdded),
    /// An item has been removed.
    ItemRemoved(ItemRemoved),
    /// The order has been soft deleted.
    Deleted,
}

impl DomainEvent for OrderEvent {
    const KINDS: &'static [&'static str] = &[
        ORDER_CREATED_EVENT_TYPE,
        ITEM_ADDED_EVENT_TYPE,
        ITEM_REMOVED_EVENT_TYPE,
        ORDER_DELETED_EVENT_TYPE,
    ];

    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => ORDER_CREATED_EVENT_TYPE,
            Self::ItemAdded(_) => ITEM_ADDED_EVENT_TYPE,
            Self::ItemRemoved(_) => ITEM_REMOVED_EVENT_TYPE,
            Self::Deleted => ORDER_DELETED_EVENT_TYPE,
        }
    }

    fn tombstone(_entity_id: &str) -> Self {
        Self::Deleted
    }

    fn is_tombstone(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_variant_has_a_listed_kind() {
        let events = [
            OrderEvent::Created(OrderCreated {
                customer_id: "C1".into(),
            }),
            OrderEvent::ItemAdded(ItemAdded { item: "X".into() }),
            OrderEvent::ItemRemoved(ItemRemoved { item: "X".into() }),
            OrderEvent::Deleted,
        ];

        for event in &events {
            assert!(OrderEvent::KINDS.contains(&event.event_type()));
        }
    }

    #[test]
    fn test_payload_uses_externally_tagged_json() {
        let event = OrderEvent::ItemAdded(ItemAdded { item: "X".into() });

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json, serde_json::json!({"ItemAdded": {"item": "X"}}));
    }

    #[test]
    fn test_deleted_is_the_tombstone() {
        assert!(OrderEvent::tombstone("O1").is_tombstone());
        assert!(!OrderEvent::ItemAdded(ItemAdded { item: "X".into() }).is_tombstone());
    }
}
