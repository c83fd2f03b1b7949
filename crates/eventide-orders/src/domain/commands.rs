//! Commands for the Orders context.

use uuid::Uuid;

/// Command to create an order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: String,
    /// Customer placing the order.
    pub customer_id: String,
    /// Items to add in the same commit.
    pub items: Vec<String>,
}

/// Command to add an item to an order.
#[derive(Debug, Clone)]
pub struct AddItem {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: String,
    /// The item.
    pub item: String,
}

/// Command to remove an item from an order.
#[derive(Debug, Clone)]
pub struct RemoveItem {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: String,
    /// The item.
    pub item: String,
}

/// Command to delete an order.
#[derive(Debug, Clone)]
pub struct DeleteOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: String,
}
