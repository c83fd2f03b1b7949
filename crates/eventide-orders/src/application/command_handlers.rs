//! Command handlers for the Orders context.
//!
//! Each handler loads the aggregate, decides, records and saves. A
//! `ConcurrencyConflict` is returned as is; callers reload and retry.

use eventide_core::aggregate::Aggregate;
use eventide_core::error::DomainError;
use eventide_core::repository::EventSourcingRepository;

use crate::domain::aggregates::Order;
use crate::domain::commands::{AddItem, CreateOrder, DeleteOrder, RemoveItem};

/// Result of a successfully handled command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCommandResult {
    /// The order affected by the command.
    pub order_id: String,
    /// Version of the order after the command; `None` after a hard delete.
    pub version: Option<i64>,
}

/// Handles the `CreateOrder` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` for invalid input and
/// `DomainError::ConcurrencyConflict` if the order already exists.
pub async fn handle_create_order(
    command: &CreateOrder,
    repo: &EventSourcingRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    let mut order = Aggregate::<Order>::new(command.order_id.clone());
    let created = order.state().create(&command.customer_id)?;
    order.record(created, command.correlation_id, repo.clock())?;
    for item in &command.items {
        let added = order.state().add_item(item)?;
        order.record(added, command.correlation_id, repo.clock())?;
    }

    let version = repo.add(&mut order).await?;
    tracing::info!(
        order_id = %command.order_id,
        version,
        correlation_id = %command.correlation_id,
        "order created"
    );
    Ok(OrderCommandResult {
        order_id: command.order_id.clone(),
        version: Some(version),
    })
}

/// Handles the `AddItem` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order does not exist,
/// `DomainError::Validation` for a duplicate item and
/// `DomainError::ConcurrencyConflict` on a concurrent write.
pub async fn handle_add_item(
    command: &AddItem,
    repo: &EventSourcingRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    let mut order = repo.get(&command.order_id).await?;
    let added = order.state().add_item(&command.item)?;
    order.record(added, command.correlation_id, repo.clock())?;

    let version = repo.update(&mut order).await?;
    tracing::debug!(order_id = %command.order_id, version, "item added");
    Ok(OrderCommandResult {
        order_id: command.order_id.clone(),
        version: Some(version),
    })
}

/// Handles the `RemoveItem` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order does not exist,
/// `DomainError::Validation` if the item is absent and
/// `DomainError::ConcurrencyConflict` on a concurrent write.
pub async fn handle_remove_item(
    command: &RemoveItem,
    repo: &EventSourcingRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    let mut order = repo.get(&command.order_id).await?;
    let removed = order.state().remove_item(&command.item)?;
    order.record(removed, command.correlation_id, repo.clock())?;

    let version = repo.update(&mut order).await?;
    tracing::debug!(order_id = %command.order_id, version, "item removed");
    Ok(OrderCommandResult {
        order_id: command.order_id.clone(),
        version: Some(version),
    })
}

/// Handles the `DeleteOrder` command using the repository's delete mode.
///
/// # Errors
///
/// Returns `DomainError::DeleteDisabled` when deletion is off and
/// `DomainError::AggregateNotFound` if the order does not exist.
pub async fn handle_delete_order(
    command: &DeleteOrder,
    repo: &EventSourcingRepository<Order>,
) -> Result<OrderCommandResult, DomainError> {
    repo.remove(&command.order_id, command.correlation_id).await?;
    tracing::info!(
        order_id = %command.order_id,
        mode = %repo.delete_mode(),
        "order deleted"
    );
    Ok(OrderCommandResult {
        order_id: command.order_id.clone(),
        version: None,
    })
}
