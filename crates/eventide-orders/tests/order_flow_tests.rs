//! Write path to read path: commands, reconciler, summary and notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eventide_core::aggregate::AggregateRoot;
use eventide_core::event::EventEnvelope;
use eventide_core::repository::{DeleteMode, EventSourcingRepository};
use eventide_event_store::memory::InMemoryEventStore;
use eventide_orders::application::command_handlers::{
    handle_add_item, handle_create_order, handle_delete_order,
};
use eventide_orders::application::query_handlers::get_order_summary;
use eventide_orders::application::read_path::order_dispatcher_builder;
use eventide_orders::domain::aggregates::Order;
use eventide_orders::domain::events::OrderEvent;
use eventide_orders::domain::commands::{AddItem, CreateOrder, DeleteOrder};
use eventide_reconciler::consumer::{Reconciler, ReconcilerConfig, ReconcilerHandle};
use eventide_reconciler::dispatcher::{EventHandler, KindFilter};
use eventide_reconciler::error::HandlerError;
use eventide_reconciler::integration::BroadcastNotificationSink;
use eventide_reconciler::read_model::{InMemoryReadModelStore, ReadModelStore};
use eventide_test_support::FixedClock;
use tokio::sync::Notify;
use uuid::Uuid;

struct Harness {
    repo: EventSourcingRepository<Order>,
    read_models: Arc<InMemoryReadModelStore>,
    sink: BroadcastNotificationSink,
    handle: ReconcilerHandle,
}

/// Post-stage handler that blocks on `order.created` until released, so the
/// summary can be observed between two events of one commit.
struct HoldAfterCreated {
    release: Arc<Notify>,
}

#[async_trait]
impl EventHandler<OrderEvent> for HoldAfterCreated {
    fn name(&self) -> &str {
        "hold-after-created"
    }

    async fn handle(&self, _event: &EventEnvelope<OrderEvent>) -> Result<(), HandlerError> {
        self.release.notified().await;
        Ok(())
    }
}

async fn start(mode: DeleteMode) -> Harness {
    start_with(mode, None).await
}

async fn start_with(mode: DeleteMode, hold: Option<Arc<Notify>>) -> Harness {
    let store = InMemoryEventStore::new();
    let repo = EventSourcingRepository::new(
        Arc::new(store.clone()),
        Arc::new(FixedClock::default()),
        mode,
    );
    let read_models = Arc::new(InMemoryReadModelStore::new());
    let sink = BroadcastNotificationSink::new(16);
    let mut builder = order_dispatcher_builder(read_models.clone(), Arc::new(sink.clone()));
    if let Some(release) = hold {
        builder = builder.post(
            KindFilter::kinds(&["order.created"]),
            Arc::new(HoldAfterCreated { release }),
        );
    }
    let dispatcher = builder.build().unwrap();
    let config = ReconcilerConfig {
        retry_min_delay: Duration::from_millis(5),
        retry_max_delay: Duration::from_millis(20),
        ..ReconcilerConfig::new("order-summary")
    };
    let handle = Reconciler::new(Arc::new(store), Order::AGGREGATE_TYPE, dispatcher, config)
        .start()
        .await
        .unwrap();
    Harness {
        repo,
        read_models,
        sink,
        handle,
    }
}

async fn wait_for_checkpoint(handle: &ReconcilerHandle, position: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while handle.checkpoint().await < Some(position) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "reconciler did not reach position {position}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn create(order_id: &str) -> CreateOrder {
    CreateOrder {
        correlation_id: Uuid::new_v4(),
        order_id: order_id.to_owned(),
        customer_id: "C1".to_owned(),
        items: Vec::new(),
    }
}

#[tokio::test]
async fn test_created_then_item_added_reaches_summary() {
    // Arrange
    let release = Arc::new(Notify::new());
    let harness = start_with(DeleteMode::Soft, Some(Arc::clone(&release))).await;
    let mut notifications = harness.sink.subscribe();
    let command = CreateOrder {
        items: vec!["X".to_owned()],
        ..create("O1")
    };

    // Act
    handle_create_order(&command, &harness.repo).await.unwrap();

    // Assert
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let intermediate = loop {
        if let Ok(summary) = get_order_summary("O1", harness.read_models.as_ref()).await {
            break summary;
        }
        assert!(tokio::time::Instant::now() < deadline, "summary never appeared");
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert_eq!(intermediate.items, Vec::<String>::new());
    assert_eq!(intermediate.version, 0);
    assert_eq!(harness.handle.checkpoint().await, None);

    release.notify_one();
    wait_for_checkpoint(&harness.handle, 2).await;
    let summary = get_order_summary("O1", harness.read_models.as_ref())
        .await
        .unwrap();
    assert_eq!(summary.id, "O1");
    assert_eq!(summary.items, vec!["X".to_owned()]);
    assert_eq!(summary.version, 1);

    let first = notifications.recv().await.unwrap();
    let second = notifications.recv().await.unwrap();
    assert_eq!(first.event_type, "order.created");
    assert_eq!(second.event_type, "order.item_added");
    assert_eq!(second.data["item"], "X");

    harness.handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_soft_delete_removes_summary_without_notification() {
    // Arrange
    let harness = start(DeleteMode::Soft).await;
    handle_create_order(&create("O1"), &harness.repo).await.unwrap();
    wait_for_checkpoint(&harness.handle, 1).await;
    let mut notifications = harness.sink.subscribe();

    // Act
    handle_delete_order(
        &DeleteOrder {
            correlation_id: Uuid::new_v4(),
            order_id: "O1".into(),
        },
        &harness.repo,
    )
    .await
    .unwrap();
    wait_for_checkpoint(&harness.handle, 2).await;

    // Assert
    assert_eq!(
        harness.read_models.get("orders", "O1").await.unwrap(),
        None
    );
    assert!(notifications.try_recv().is_err());

    harness.handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_hard_delete_removes_summary_and_blocks_recreation() {
    // Arrange
    let harness = start(DeleteMode::Hard).await;
    handle_create_order(&create("O1"), &harness.repo).await.unwrap();
    wait_for_checkpoint(&harness.handle, 1).await;
    assert!(get_order_summary("O1", harness.read_models.as_ref()).await.is_ok());
    let mut notifications = harness.sink.subscribe();

    // Act
    handle_delete_order(
        &DeleteOrder {
            correlation_id: Uuid::new_v4(),
            order_id: "O1".into(),
        },
        &harness.repo,
    )
    .await
    .unwrap();
    wait_for_checkpoint(&harness.handle, 2).await;

    // Assert
    assert_eq!(
        harness.read_models.get("orders", "O1").await.unwrap(),
        None
    );
    assert!(notifications.try_recv().is_err());
    let recreated = handle_create_order(&create("O1"), &harness.repo).await;
    assert!(recreated.is_err());

    harness.handle.stop().await.unwrap();
}
