//! Wiring of the order handlers into a dispatcher.

use std::sync::Arc;

use eventide_reconciler::dispatcher::{Dispatcher, DispatcherBuilder, KindFilter};
use eventide_reconciler::error::DispatcherBuildError;
use eventide_reconciler::integration::{IntegrationEmitter, NotificationSink};
use eventide_reconciler::read_model::ReadModelStore;

use super::notifications::{ORDER_NOTIFICATIONS, order_notifications};
use super::projections::OrderSummaryProjection;
use crate::domain::events::OrderEvent;

/// Registers the order handlers: the summary projection followed by public
/// notifications. Callers may add further handlers before building.
#[must_use]
pub fn order_dispatcher_builder(
    read_models: Arc<dyn ReadModelStore>,
    sink: Arc<dyn NotificationSink>,
) -> DispatcherBuilder<OrderEvent> {
    Dispatcher::builder()
        .projection(
            KindFilter::All,
            Arc::new(OrderSummaryProjection::new(read_models)),
        )
        .integration(
            KindFilter::All,
            Arc::new(IntegrationEmitter::new(
                ORDER_NOTIFICATIONS,
                sink,
                order_notifications,
            )),
        )
}

/// Builds the dispatcher for the `order` category.
///
/// # Errors
///
/// Returns `DispatcherBuildError` if a handler filter names an unknown kind.
pub fn order_dispatcher(
    read_models: Arc<dyn ReadModelStore>,
    sink: Arc<dyn NotificationSink>,
) -> Result<Dispatcher<OrderEvent>, DispatcherBuildError> {
    order_dispatcher_builder(read_models, sink).build()
}
