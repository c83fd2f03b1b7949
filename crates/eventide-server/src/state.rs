//! Shared application state.

use std::sync::Arc;

use eventide_core::clock::Clock;
use eventide_core::repository::{DeleteMode, EventSourcingRepository};
use eventide_core::store::EventStore;
use eventide_orders::domain::aggregates::Order;
use eventide_reconciler::read_model::ReadModelStore;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Event store backing the write path and operator queries.
    pub event_store: Arc<dyn EventStore>,
    /// Repository for the order aggregate.
    pub orders: EventSourcingRepository<Order>,
    /// Read models maintained by the reconciler.
    pub read_models: Arc<dyn ReadModelStore>,
    /// Consumer group of the order summary reconciler.
    pub consumer_group: String,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(
        event_store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
        delete_mode: DeleteMode,
        read_models: Arc<dyn ReadModelStore>,
        consumer_group: impl Into<String>,
    ) -> Self {
        let orders = EventSourcingRepository::new(Arc::clone(&event_store), clock, delete_mode);
        Self {
            event_store,
            orders,
            read_models,
            consumer_group: consumer_group.into(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orders", &self.orders)
            .field("consumer_group", &self.consumer_group)
            .finish_non_exhaustive()
    }
}
