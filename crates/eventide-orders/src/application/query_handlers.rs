//! Query handlers for the Orders context.
//!
//! Queries read the summary read model only, so they observe writes once the
//! reconciler has caught up.

use eventide_core::error::DomainError;
use eventide_reconciler::read_model::ReadModelStore;

use super::projections::{ORDERS_COLLECTION, OrderSummary};

fn decode(document: serde_json::Value) -> Result<OrderSummary, DomainError> {
    serde_json::from_value(document)
        .map_err(|e| DomainError::Infrastructure(format!("unreadable order summary: {e}")))
}

/// Fetches the summary of one order.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no summary exists and
/// `DomainError::Infrastructure` if the read model is unavailable.
pub async fn get_order_summary(
    order_id: &str,
    read_models: &dyn ReadModelStore,
) -> Result<OrderSummary, DomainError> {
    let document = read_models
        .get(ORDERS_COLLECTION, order_id)
        .await
        .map_err(|e| DomainError::Infrastructure(e.to_string()))?
        .ok_or_else(|| DomainError::AggregateNotFound(order_id.to_owned()))?;
    decode(document)
}

/// Lists every order summary, ordered by id.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if the read model is unavailable.
pub async fn list_order_summaries(
    read_models: &dyn ReadModelStore,
) -> Result<Vec<OrderSummary>, DomainError> {
    read_models
        .list(ORDERS_COLLECTION)
        .await
        .map_err(|e| DomainError::Infrastructure(e.to_string()))?
        .into_iter()
        .map(decode)
        .collect()
}
