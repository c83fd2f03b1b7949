//! Subscription consumer: drives records from a category subscription through
//! decoding and dispatch, and settles each one with ack, nack or park.
//!
//! Records are fanned out to a fixed number of single-worker lanes keyed by a
//! hash of the stream id, so one entity's events are always handled by the
//! same lane, one after the other. The subscription itself never delivers a
//! record while an earlier record of the same stream is unsettled, so a
//! failing event holds back its successors until it is acknowledged or
//! parked.

use std::collections::HashSet;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use eventide_core::codec;
use eventide_core::error::DomainError;
use eventide_core::event::DomainEvent;
use eventide_core::record::DeliveredRecord;
use eventide_core::store::{EventStore, Subscription};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;

use crate::dispatcher::{Dispatcher, StreamDeleted};
use crate::error::ReconcileError;

/// Tuning of a [`Reconciler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Consumer group; owns the checkpoint and parked records.
    pub consumer_group: String,
    /// Number of single-worker lanes.
    pub lanes: usize,
    /// Upper bound on dispatching one event.
    pub handler_timeout: Duration,
    /// Deliveries after which a failing record is parked.
    pub max_deliveries: u32,
    /// First retry delay.
    pub retry_min_delay: Duration,
    /// Retry delay ceiling.
    pub retry_max_delay: Duration,
}

impl ReconcilerConfig {
    /// Default tuning for `consumer_group`.
    #[must_use]
    pub fn new(consumer_group: impl Into<String>) -> Self {
        Self {
            consumer_group: consumer_group.into(),
            lanes: 4,
            handler_timeout: Duration::from_secs(10),
            max_deliveries: 5,
            retry_min_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(10),
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.retry_min_delay)
            .with_max_delay(self.retry_max_delay)
            .with_max_times(self.max_deliveries as usize)
            .with_jitter()
    }

    /// Delay before redelivering a record that failed on its
    /// `delivery_count`-th delivery.
    fn retry_delay(&self, delivery_count: u32) -> Duration {
        self.backoff()
            .build()
            .nth(delivery_count.saturating_sub(1) as usize)
            .unwrap_or(self.retry_max_delay)
    }
}

/// Where a delivered record is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Handed out by the subscription.
    Delivered,
    /// Being decoded.
    Decoding,
    /// Being dispatched to handlers.
    Dispatching,
    /// Settled successfully.
    Acknowledged,
    /// The payload could not be decoded.
    DecodingFailed,
    /// A handler failed or timed out.
    DispatchFailed,
    /// Left unacknowledged for a later redelivery.
    Retrying,
    /// Moved aside for an operator after exhausting its deliveries.
    Parked,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delivered => "delivered",
            Self::Decoding => "decoding",
            Self::Dispatching => "dispatching",
            Self::Acknowledged => "acknowledged",
            Self::DecodingFailed => "decoding-failed",
            Self::DispatchFailed => "dispatch-failed",
            Self::Retrying => "retrying",
            Self::Parked => "parked",
        };
        f.write_str(name)
    }
}

/// Takes one delivered record to a terminal state.
struct RecordProcessor<E: DomainEvent> {
    subscription: Arc<dyn Subscription>,
    dispatcher: Arc<Dispatcher<E>>,
    config: ReconcilerConfig,
}

impl<E: DomainEvent> RecordProcessor<E> {
    async fn process(&self, delivered: &DeliveredRecord) -> Result<RecordState, DomainError> {
        let record = &delivered.record;
        let position = delivered.position();
        tracing::trace!(
            state = %RecordState::Delivered,
            position,
            stream_id = %record.stream_id,
            delivery_count = delivered.delivery_count,
            "received record"
        );

        if let Some(deleted) = StreamDeleted::from_marker(record) {
            return self.reconcile_deletion(delivered, &deleted).await;
        }
        if record.is_system() {
            tracing::debug!(
                position,
                stream_id = %record.stream_id,
                event_type = %record.event_type,
                "skipping system record"
            );
            self.subscription.ack(position).await?;
            return Ok(RecordState::Acknowledged);
        }

        tracing::trace!(state = %RecordState::Decoding, position, "decoding record");
        let event = match codec::decode::<E>(record) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(
                    state = %RecordState::DecodingFailed,
                    position,
                    stream_id = %record.stream_id,
                    delivery_count = delivered.delivery_count,
                    error = %err,
                    "failed to decode record"
                );
                return self.retry_or_park(delivered, &err.to_string()).await;
            }
        };

        tracing::trace!(state = %RecordState::Dispatching, position, "dispatching event");
        let reason = match tokio::time::timeout(
            self.config.handler_timeout,
            self.dispatcher.dispatch(&event),
        )
        .await
        {
            Ok(Ok(())) => {
                self.subscription.ack(position).await?;
                tracing::debug!(
                    state = %RecordState::Acknowledged,
                    position,
                    stream_id = %record.stream_id,
                    event_type = event.event_type(),
                    version = event.version(),
                    "reconciled event"
                );
                return Ok(RecordState::Acknowledged);
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!(
                "dispatch timed out after {} ms",
                self.config.handler_timeout.as_millis()
            ),
        };
        tracing::warn!(
            state = %RecordState::DispatchFailed,
            position,
            stream_id = %record.stream_id,
            delivery_count = delivered.delivery_count,
            error = %reason,
            "failed to dispatch event"
        );
        self.retry_or_park(delivered, &reason).await
    }

    async fn reconcile_deletion(
        &self,
        delivered: &DeliveredRecord,
        deleted: &StreamDeleted,
    ) -> Result<RecordState, DomainError> {
        let position = delivered.position();
        tracing::trace!(
            state = %RecordState::Dispatching,
            position,
            stream_id = %deleted.stream_id,
            "dispatching stream deletion"
        );
        let reason = match tokio::time::timeout(
            self.config.handler_timeout,
            self.dispatcher.dispatch_stream_deleted(deleted),
        )
        .await
        {
            Ok(Ok(())) => {
                self.subscription.ack(position).await?;
                tracing::debug!(
                    state = %RecordState::Acknowledged,
                    position,
                    stream_id = %deleted.stream_id,
                    last_version = deleted.last_version,
                    "reconciled stream deletion"
                );
                return Ok(RecordState::Acknowledged);
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!(
                "dispatch timed out after {} ms",
                self.config.handler_timeout.as_millis()
            ),
        };
        tracing::warn!(
            state = %RecordState::DispatchFailed,
            position,
            stream_id = %deleted.stream_id,
            delivery_count = delivered.delivery_count,
            error = %reason,
            "failed to dispatch stream deletion"
        );
        self.retry_or_park(delivered, &reason).await
    }

    async fn retry_or_park(
        &self,
        delivered: &DeliveredRecord,
        reason: &str,
    ) -> Result<RecordState, DomainError> {
        if delivered.delivery_count >= self.config.max_deliveries {
            self.subscription.park(delivered, reason).await?;
            return Ok(RecordState::Parked);
        }
        let delay = self.config.retry_delay(delivered.delivery_count);
        self.subscription.nack(delivered.position(), delay).await?;
        tracing::debug!(
            state = %RecordState::Retrying,
            position = delivered.position(),
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduled redelivery"
        );
        Ok(RecordState::Retrying)
    }
}

/// Index of the lane that handles `stream_id`.
fn lane_for(stream_id: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    stream_id.hash(&mut hasher);
    usize::try_from(hasher.finish() % lanes.max(1) as u64).unwrap_or(0)
}

/// Keeps read models in step with one category of the event log.
pub struct Reconciler<E: DomainEvent> {
    store: Arc<dyn EventStore>,
    category: String,
    dispatcher: Arc<Dispatcher<E>>,
    config: ReconcilerConfig,
}

impl<E: DomainEvent> fmt::Debug for Reconciler<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("category", &self.category)
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl<E: DomainEvent> Reconciler<E> {
    /// Creates a reconciler for `category`.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        category: impl Into<String>,
        dispatcher: Dispatcher<E>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            category: category.into(),
            dispatcher: Arc::new(dispatcher),
            config,
        }
    }

    /// Subscribes and starts consuming in the background.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Store` if the subscription cannot be opened.
    pub async fn start(self) -> Result<ReconcilerHandle, ReconcileError> {
        let subscription = self
            .store
            .subscribe(&self.category, &self.config.consumer_group)
            .await?;
        let lanes = self.config.lanes.max(1);
        let processor = Arc::new(RecordProcessor {
            subscription: Arc::clone(&subscription),
            dispatcher: self.dispatcher,
            config: self.config.clone(),
        });

        let queued = Queued::default();
        let mut senders = Vec::with_capacity(lanes);
        let mut workers = Vec::with_capacity(lanes);
        for lane in 0..lanes {
            // The window bounds what is queued, so a lane never holds more
            // than `lanes` records.
            let (tx, rx) = mpsc::channel(lanes);
            senders.push(tx);
            workers.push(tokio::spawn(run_lane(
                lane,
                Arc::clone(&processor),
                Arc::clone(&queued),
                rx,
            )));
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        tracing::info!(
            category = %self.category,
            consumer_group = %self.config.consumer_group,
            lanes,
            "reconciler started"
        );
        let task = tokio::spawn(run_pump(
            Arc::clone(&subscription),
            senders,
            workers,
            queued,
            stop_rx,
        ));
        Ok(ReconcilerHandle {
            stop: stop_tx,
            task,
            subscription,
        })
    }
}

/// A record handed to a lane. Holds one slot of the pump's window until the
/// lane has settled it.
struct LaneItem {
    delivered: DeliveredRecord,
    _slot: OwnedSemaphorePermit,
}

/// Positions handed to a lane and not settled yet.
type Queued = Arc<Mutex<HashSet<u64>>>;

async fn run_lane<E: DomainEvent>(
    lane: usize,
    processor: Arc<RecordProcessor<E>>,
    queued: Queued,
    mut items: mpsc::Receiver<LaneItem>,
) {
    while let Some(item) = items.recv().await {
        let delivered = &item.delivered;
        if let Err(err) = processor.process(delivered).await {
            // Left unsettled; the subscription redelivers it after the ack timeout.
            tracing::error!(
                lane,
                position = delivered.position(),
                stream_id = %delivered.record.stream_id,
                error = %err,
                "failed to settle record"
            );
        }
        queued.lock().await.remove(&delivered.position());
    }
    tracing::debug!(lane, "lane drained");
}

/// Pulls records while a window slot is free and routes them to their lane.
///
/// The window holds as many records as there are lanes, so a record never
/// waits long in a lane queue before its handler starts. A redelivery of a
/// record a lane still holds is dropped; the subscription schedules it again.
async fn run_pump(
    subscription: Arc<dyn Subscription>,
    lanes: Vec<mpsc::Sender<LaneItem>>,
    workers: Vec<JoinHandle<()>>,
    queued: Queued,
    mut stop: watch::Receiver<bool>,
) {
    let window = Arc::new(Semaphore::new(lanes.len()));
    loop {
        if *stop.borrow() {
            break;
        }
        let slot = tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            slot = Arc::clone(&window).acquire_owned() => match slot {
                Ok(slot) => slot,
                Err(_) => break,
            },
        };
        let next = tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            next = subscription.next() => next,
        };
        match next {
            Ok(Some(delivered)) => {
                if !queued.lock().await.insert(delivered.position()) {
                    tracing::debug!(
                        position = delivered.position(),
                        delivery_count = delivered.delivery_count,
                        "dropping redelivery of a record still queued"
                    );
                    continue;
                }
                let lane = lane_for(&delivered.record.stream_id, lanes.len());
                let item = LaneItem {
                    delivered,
                    _slot: slot,
                };
                if lanes[lane].send(item).await.is_err() {
                    tracing::error!(lane, "lane stopped unexpectedly");
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::error!(
                    category = subscription.category(),
                    consumer_group = subscription.consumer_group(),
                    error = %err,
                    "subscription read failed"
                );
                tokio::select! {
                    _ = stop.changed() => {}
                    () = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }

    drop(lanes);
    for worker in workers {
        if let Err(err) = worker.await {
            tracing::error!(error = %err, "lane task failed");
        }
    }
    subscription.close();
    tracing::info!(
        category = subscription.category(),
        consumer_group = subscription.consumer_group(),
        "reconciler stopped"
    );
}

/// Handle to a running [`Reconciler`].
pub struct ReconcilerHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
    subscription: Arc<dyn Subscription>,
}

impl fmt::Debug for ReconcilerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcilerHandle")
            .field("category", &self.subscription.category())
            .field("consumer_group", &self.subscription.consumer_group())
            .field("finished", &self.task.is_finished())
            .finish_non_exhaustive()
    }
}

impl ReconcilerHandle {
    /// Highest position up to which every record is settled.
    pub async fn checkpoint(&self) -> Option<u64> {
        self.subscription.checkpoint().await
    }

    /// Stops pulling new records, lets the lanes finish what they already
    /// received, then closes the subscription.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::Task` if the background task panicked.
    pub async fn stop(self) -> Result<(), ReconcileError> {
        // Fails only if the pump already exited.
        let _ = self.stop.send(true);
        self.task
            .await
            .map_err(|err| ReconcileError::Task(err.to_string()))
    }
}
