//! Durable category subscriptions shared by the store backends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use eventide_core::error::DomainError;
use eventide_core::record::{DeliveredRecord, EventRecord, ParkedRecord};
use eventide_core::store::Subscription;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;

use crate::delivery::DeliveryTracker;

/// Tuning knobs for subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// How long a delivered record may stay unacknowledged before it is
    /// redelivered.
    pub ack_timeout: Duration,
    /// Upper bound on records in flight or held per subscription.
    pub max_in_flight: usize,
    /// How often backends without change notification poll the log.
    pub poll_interval: Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(30),
            max_in_flight: 256,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// How a subscription learns that new records may be available.
#[derive(Debug)]
pub(crate) enum HeadWatch {
    /// The backend publishes its head position.
    Changes(watch::Receiver<u64>),
    /// The backend must be polled.
    Poll(Duration),
}

impl HeadWatch {
    async fn changed(&mut self) {
        match self {
            Self::Changes(rx) => {
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            Self::Poll(interval) => tokio::time::sleep(*interval).await,
        }
    }
}

/// The storage operations a subscription needs from its backend.
#[async_trait]
pub(crate) trait CategoryLog: Send + Sync + 'static {
    /// Returns up to `limit` records of `category` at or after `from`, in
    /// position order.
    async fn scan(
        &self,
        category: &str,
        from: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, DomainError>;

    /// Persists an advanced checkpoint.
    async fn store_checkpoint(
        &self,
        category: &str,
        consumer_group: &str,
        position: u64,
    ) -> Result<(), DomainError>;

    /// Persists a parked record.
    async fn store_parked(
        &self,
        category: &str,
        consumer_group: &str,
        parked: ParkedRecord,
    ) -> Result<(), DomainError>;

    /// Starts watching for appends. Must be called before scanning so no
    /// append is missed.
    fn watch_head(&self) -> HeadWatch;
}

/// A subscription over any [`CategoryLog`].
pub(crate) struct LogSubscription<L> {
    log: Arc<L>,
    category: String,
    consumer_group: String,
    tracker: Mutex<DeliveryTracker>,
    /// Woken on ack, nack, park and close.
    settled: Notify,
    closed: AtomicBool,
}

impl<L: CategoryLog> LogSubscription<L> {
    pub(crate) fn new(
        log: Arc<L>,
        category: &str,
        consumer_group: &str,
        checkpoint: Option<u64>,
        settings: SubscriptionSettings,
    ) -> Self {
        tracing::info!(
            category,
            consumer_group,
            checkpoint = ?checkpoint,
            "opening subscription"
        );
        Self {
            log,
            category: category.to_owned(),
            consumer_group: consumer_group.to_owned(),
            tracker: Mutex::new(DeliveryTracker::new(
                checkpoint,
                settings.ack_timeout,
                settings.max_in_flight,
            )),
            settled: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    async fn persist_checkpoint(&self, before: Option<u64>, after: Option<u64>) -> Result<(), DomainError> {
        match after {
            Some(position) if after > before => {
                self.log
                    .store_checkpoint(&self.category, &self.consumer_group, position)
                    .await
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<L: CategoryLog> Subscription for LogSubscription<L> {
    fn category(&self) -> &str {
        &self.category
    }

    fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    async fn next(&self) -> Result<Option<DeliveredRecord>, DomainError> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Ok(None);
            }
            let mut head = self.log.watch_head();
            let scan_from = {
                let tracker = self.tracker.lock().await;
                tracker
                    .wants_more()
                    .then(|| (tracker.cursor(), tracker.fetch_limit()))
            };
            // Scanned without the lock; enqueue drops anything a concurrent
            // scan already queued.
            let scanned = match scan_from {
                Some((from, limit)) => Some(self.log.scan(&self.category, from, limit).await?),
                None => None,
            };
            let deadline = {
                let mut tracker = self.tracker.lock().await;
                if let Some(records) = scanned {
                    tracker.enqueue(records);
                }
                if let Some(delivered) = tracker.next_delivery(Instant::now()) {
                    tracing::trace!(
                        consumer_group = %self.consumer_group,
                        position = delivered.position(),
                        stream_id = %delivered.record.stream_id,
                        delivery_count = delivered.delivery_count,
                        "delivering record"
                    );
                    return Ok(Some(delivered));
                }
                tracker.next_deadline()
            };

            let redelivery = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                () = head.changed() => {}
                () = self.settled.notified() => {}
                () = redelivery => {}
            }
        }
    }

    async fn ack(&self, position: u64) -> Result<(), DomainError> {
        let (before, after) = {
            let mut tracker = self.tracker.lock().await;
            let before = tracker.checkpoint();
            tracker.ack(position)?;
            (before, tracker.checkpoint())
        };
        self.settled.notify_one();
        self.persist_checkpoint(before, after).await
    }

    async fn nack(&self, position: u64, retry_after: Duration) -> Result<(), DomainError> {
        self.tracker
            .lock()
            .await
            .nack(position, retry_after, Instant::now())?;
        self.settled.notify_one();
        Ok(())
    }

    async fn park(&self, delivered: &DeliveredRecord, reason: &str) -> Result<(), DomainError> {
        let position = delivered.position();
        if !self.tracker.lock().await.is_in_flight(position) {
            return Err(DomainError::Validation(format!(
                "record at position {position} is not in flight"
            )));
        }
        // The parked entry must be durable before the record counts as
        // settled; on failure it stays in flight and is redelivered.
        self.log
            .store_parked(
                &self.category,
                &self.consumer_group,
                ParkedRecord::new(delivered, reason, Utc::now()),
            )
            .await?;
        let (before, after) = {
            let mut tracker = self.tracker.lock().await;
            let before = tracker.checkpoint();
            tracker.park(position)?;
            (before, tracker.checkpoint())
        };
        self.settled.notify_one();
        tracing::warn!(
            category = %self.category,
            consumer_group = %self.consumer_group,
            position,
            stream_id = %delivered.record.stream_id,
            delivery_count = delivered.delivery_count,
            reason,
            "parked record"
        );
        self.persist_checkpoint(before, after).await
    }

    async fn checkpoint(&self) -> Option<u64> {
        self.tracker.lock().await.checkpoint()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.settled.notify_waiters();
        self.settled.notify_one();
    }
}
