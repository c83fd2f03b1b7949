//! Aggregate roots for the Orders context.
//!
//! Decisions live on [`Order`] and return the event to record; the command
//! handlers record it on the surrounding [`Aggregate`](eventide_core::aggregate::Aggregate).

use eventide_core::aggregate::AggregateRoot;
use eventide_core::error::DomainError;

use super::events::{ItemAdded, ItemRemoved, OrderCreated, OrderEvent};

/// An order placed by a customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Order identifier.
    pub id: String,
    /// Customer placing the order; `None` until created.
    pub customer_id: Option<String>,
    /// Items in the order, in the order they were added.
    pub items: Vec<String>,
}

impl Order {
    /// Returns `true` once the order has been created.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.customer_id.is_some()
    }

    /// Decides the creation event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the order already exists or the
    /// customer id is blank.
    pub fn create(&self, customer_id: &str) -> Result<OrderEvent, DomainError> {
        if self.is_created() {
            return Err(DomainError::Validation(format!(
                "order {} already exists",
                self.id
            )));
        }
        let customer_id = customer_id.trim();
        if customer_id.is_empty() {
            return Err(DomainError::Validation(
                "customer id must not be empty".to_owned(),
            ));
        }
        Ok(OrderEvent::Created(OrderCreated {
            customer_id: customer_id.to_owned(),
        }))
    }

    /// Decides the event for adding `item`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the item name is blank or already
    /// in the order.
    pub fn add_item(&self, item: &str) -> Result<OrderEvent, DomainError> {
        let item = item.trim();
        if item.is_empty() {
            return Err(DomainError::Validation(
                "item must not be empty".to_owned(),
            ));
        }
        if self.items.iter().any(|existing| existing == item) {
            return Err(DomainError::Validation(format!(
                "item {item} is already in order {}",
                self.id
            )));
        }
        Ok(OrderEvent::ItemAdded(ItemAdded {
            item: item.to_owned(),
        }))
    }

    /// Decides the event for removing `item`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the item is not in the order.
    pub fn remove_item(&self, item: &str) -> Result<OrderEvent, DomainError> {
        let item = item.trim();
        if !self.items.iter().any(|existing| existing == item) {
            return Err(DomainError::Validation(format!(
                "item {item} is not in order {}",
                self.id
            )));
        }
        Ok(OrderEvent::ItemRemoved(ItemRemoved {
            item: item.to_owned(),
        }))
    }
}

impl AggregateRoot for Order {
    type Event = OrderEvent;
    const AGGREGATE_TYPE: &'static str = "order";

    fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            customer_id: None,
            items: Vec::new(),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Created(created) => {
                self.customer_id = Some(created.customer_id.clone());
            }
            OrderEvent::ItemAdded(added) => self.items.push(added.item.clone()),
            OrderEvent::ItemRemoved(removed) => {
                self.items.retain(|item| item != &removed.item);
            }
            OrderEvent::Deleted => {}
        }
    }
}
