//! Shared handlers and helpers for reconciler integration tests.
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eventide_core::aggregate::Aggregate;
use eventide_core::event::EventEnvelope;
use eventide_core::repository::{DeleteMode, EventSourcingRepository};
use eventide_event_store::memory::InMemoryEventStore;
use eventide_reconciler::consumer::ReconcilerConfig;
use eventide_reconciler::dispatcher::{EventHandler, StreamDeleted};
use eventide_reconciler::error::HandlerError;
use eventide_reconciler::read_model::ReadModelStore;
use eventide_test_support::{Counter, CounterEvent, FixedClock};
use serde_json::json;
use uuid::Uuid;

pub type Log = Arc<Mutex<Vec<String>>>;

/// Config with short retry delays so failure paths settle quickly.
pub fn fast_config(group: &str) -> ReconcilerConfig {
    ReconcilerConfig {
        retry_min_delay: Duration::from_millis(5),
        retry_max_delay: Duration::from_millis(20),
        max_deliveries: 3,
        handler_timeout: Duration::from_secs(2),
        ..ReconcilerConfig::new(group)
    }
}

pub fn repository(store: &InMemoryEventStore, mode: DeleteMode) -> EventSourcingRepository<Counter> {
    EventSourcingRepository::new(
        Arc::new(store.clone()),
        Arc::new(FixedClock::default()),
        mode,
    )
}

/// Commits `Opened` followed by one `Incremented` per entry in a single append.
pub async fn create_counter(store: &InMemoryEventStore, id: &str, increments: &[u32]) {
    let repo = repository(store, DeleteMode::Soft);
    let mut counter = Aggregate::<Counter>::new(id);
    counter
        .record(CounterEvent::Opened, Uuid::new_v4(), repo.clock())
        .unwrap();
    for n in increments {
        counter
            .record(CounterEvent::Incremented(*n), Uuid::new_v4(), repo.clock())
            .unwrap();
    }
    repo.add(&mut counter).await.unwrap();
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn label(event: &EventEnvelope<CounterEvent>) -> String {
    format!(
        "{}:{}@{}",
        event.metadata.entity_id,
        event.event_type(),
        event.version()
    )
}

/// Logs `start:` and `end:` entries around an optional delay.
pub struct RecordingHandler {
    pub name: &'static str,
    pub log: Log,
    pub delay_on: Option<(&'static str, Duration)>,
}

impl RecordingHandler {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            delay_on: None,
        }
    }

    pub fn delaying(mut self, kind: &'static str, delay: Duration) -> Self {
        self.delay_on = Some((kind, delay));
        self
    }
}

#[async_trait]
impl EventHandler<CounterEvent> for RecordingHandler {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, event: &EventEnvelope<CounterEvent>) -> Result<(), HandlerError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("start:{}", label(event)));
        if let Some((kind, delay)) = self.delay_on {
            if event.event_type() == kind {
                tokio::time::sleep(delay).await;
            }
        }
        self.log.lock().unwrap().push(format!("end:{}", label(event)));
        Ok(())
    }
}

/// Fails for one event kind, always.
pub struct FailingHandler {
    pub kind: &'static str,
    pub attempts: Arc<AtomicU32>,
}

#[async_trait]
impl EventHandler<CounterEvent> for FailingHandler {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, event: &EventEnvelope<CounterEvent>) -> Result<(), HandlerError> {
        if event.event_type() == self.kind {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            return Err(HandlerError::Failed(format!("cannot handle {}", self.kind)));
        }
        Ok(())
    }
}

/// Fails the first `failures` calls, then delegates.
pub struct FlakyHandler {
    pub failures: AtomicU32,
    pub inner: Arc<dyn EventHandler<CounterEvent>>,
}

#[async_trait]
impl EventHandler<CounterEvent> for FlakyHandler {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn handle(&self, event: &EventEnvelope<CounterEvent>) -> Result<(), HandlerError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(HandlerError::Failed("transient failure".into()));
        }
        self.inner.handle(event).await
    }
}

/// Sleeps longer than any sane handler timeout.
pub struct StuckHandler;

#[async_trait]
impl EventHandler<CounterEvent> for StuckHandler {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn handle(&self, _event: &EventEnvelope<CounterEvent>) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
}

/// Maintains `{id, total, increments, version}` in the `counters` collection.
pub struct CounterProjection {
    pub store: Arc<dyn ReadModelStore>,
}

#[async_trait]
impl EventHandler<CounterEvent> for CounterProjection {
    fn name(&self) -> &str {
        "counter-projection"
    }

    async fn handle(&self, event: &EventEnvelope<CounterEvent>) -> Result<(), HandlerError> {
        let id = &event.metadata.entity_id;
        let current = self.store.get("counters", id).await?;
        let seen = current
            .as_ref()
            .and_then(|doc| doc["version"].as_i64())
            .unwrap_or(-1);
        if event.version() <= seen {
            return Ok(());
        }
        let mut total = current
            .as_ref()
            .and_then(|doc| doc["total"].as_u64())
            .unwrap_or(0);
        let mut increments: Vec<u64> = current
            .as_ref()
            .and_then(|doc| serde_json::from_value(doc["increments"].clone()).ok())
            .unwrap_or_default();
        match &event.kind {
            CounterEvent::Opened => {}
            CounterEvent::Incremented(n) => {
                total += u64::from(*n);
                increments.push(u64::from(*n));
            }
            CounterEvent::Closed => {
                self.store.delete("counters", id).await?;
                return Ok(());
            }
        }
        self.store
            .upsert(
                "counters",
                id,
                json!({
                    "id": id,
                    "total": total,
                    "increments": increments,
                    "version": event.version(),
                }),
            )
            .await?;
        Ok(())
    }

    async fn stream_deleted(&self, deleted: &StreamDeleted) -> Result<(), HandlerError> {
        self.store.delete("counters", &deleted.entity_id).await?;
        Ok(())
    }
}
