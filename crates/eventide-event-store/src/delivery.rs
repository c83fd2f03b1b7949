//! Per consumer group delivery bookkeeping.
//!
//! Tracks which records of a category view are buffered, in flight or held,
//! and derives the checkpoint from the lowest unsettled position. A record is
//! held while an earlier record of the same stream is unsettled.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use eventide_core::error::DomainError;
use eventide_core::record::{DeliveredRecord, EventRecord};
use tokio::time::Instant;

#[derive(Debug)]
struct InFlight {
    record: EventRecord,
    delivery_count: u32,
    redeliver_at: Instant,
}

/// Delivery state of one subscription.
#[derive(Debug)]
pub(crate) struct DeliveryTracker {
    /// Next global position to fetch from the log.
    cursor: u64,
    /// Fetched records not examined yet, in position order.
    buffer: VecDeque<EventRecord>,
    in_flight: BTreeMap<u64, InFlight>,
    /// Records waiting for an earlier record of their stream to settle.
    held: BTreeMap<u64, EventRecord>,
    ack_timeout: Duration,
    max_in_flight: usize,
}

impl DeliveryTracker {
    pub(crate) fn new(checkpoint: Option<u64>, ack_timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            cursor: checkpoint.map_or(1, |position| position + 1),
            buffer: VecDeque::new(),
            in_flight: BTreeMap::new(),
            held: BTreeMap::new(),
            ack_timeout,
            max_in_flight: max_in_flight.max(1),
        }
    }

    pub(crate) fn cursor(&self) -> u64 {
        self.cursor
    }

    fn outstanding(&self) -> usize {
        self.in_flight.len() + self.held.len()
    }

    /// Whether the log should be scanned for more records.
    pub(crate) fn wants_more(&self) -> bool {
        self.buffer.is_empty() && self.outstanding() < self.max_in_flight
    }

    /// How many records a scan may return.
    pub(crate) fn fetch_limit(&self) -> usize {
        self.max_in_flight.saturating_sub(self.outstanding()).max(1)
    }

    /// Queues freshly scanned records in position order. Records below the
    /// cursor were already seen and are dropped.
    pub(crate) fn enqueue(&mut self, records: Vec<EventRecord>) {
        for record in records {
            if record.position < self.cursor {
                continue;
            }
            self.cursor = record.position + 1;
            self.buffer.push_back(record);
        }
    }

    /// Picks the next record to hand out: an expired in-flight record first,
    /// then a released held record, then the buffer.
    pub(crate) fn next_delivery(&mut self, now: Instant) -> Option<DeliveredRecord> {
        let due = self
            .in_flight
            .iter()
            .find(|(_, flight)| flight.redeliver_at <= now)
            .map(|(position, _)| *position);
        if let Some(position) = due {
            let flight = self.in_flight.get_mut(&position)?;
            flight.delivery_count += 1;
            flight.redeliver_at = now + self.ack_timeout;
            return Some(DeliveredRecord {
                record: flight.record.clone(),
                delivery_count: flight.delivery_count,
            });
        }

        let released = self
            .held
            .iter()
            .find(|(position, record)| !self.stream_busy(&record.stream_id, **position))
            .map(|(position, _)| *position);
        if let Some(position) = released {
            let record = self.held.remove(&position)?;
            return Some(self.hand_out(record, now));
        }

        while let Some(record) = self.buffer.pop_front() {
            if self.stream_busy(&record.stream_id, record.position) {
                self.held.insert(record.position, record);
                continue;
            }
            return Some(self.hand_out(record, now));
        }
        None
    }

    /// Whether a record of `stream_id` at `position` must wait.
    fn stream_busy(&self, stream_id: &str, position: u64) -> bool {
        self.in_flight
            .values()
            .any(|flight| flight.record.stream_id == stream_id)
            || self
                .held
                .range(..position)
                .any(|(_, record)| record.stream_id == stream_id)
    }

    fn hand_out(&mut self, record: EventRecord, now: Instant) -> DeliveredRecord {
        let delivered = DeliveredRecord {
            record: record.clone(),
            delivery_count: 1,
        };
        self.in_flight.insert(
            record.position,
            InFlight {
                record,
                delivery_count: 1,
                redeliver_at: now + self.ack_timeout,
            },
        );
        delivered
    }

    fn not_in_flight(position: u64) -> DomainError {
        DomainError::Validation(format!("record at position {position} is not in flight"))
    }

    /// Settles an acknowledged record.
    pub(crate) fn ack(&mut self, position: u64) -> Result<(), DomainError> {
        self.in_flight
            .remove(&position)
            .map(|_| ())
            .ok_or_else(|| Self::not_in_flight(position))
    }

    /// Schedules redelivery of an in-flight record after `retry_after`.
    pub(crate) fn nack(
        &mut self,
        position: u64,
        retry_after: Duration,
        now: Instant,
    ) -> Result<(), DomainError> {
        let flight = self
            .in_flight
            .get_mut(&position)
            .ok_or_else(|| Self::not_in_flight(position))?;
        flight.redeliver_at = now + retry_after;
        Ok(())
    }

    /// Whether `position` was delivered and is not settled yet.
    pub(crate) fn is_in_flight(&self, position: u64) -> bool {
        self.in_flight.contains_key(&position)
    }

    /// Settles a parked record.
    pub(crate) fn park(&mut self, position: u64) -> Result<(), DomainError> {
        self.ack(position)
    }

    /// Highest position at or below which every record is settled.
    pub(crate) fn checkpoint(&self) -> Option<u64> {
        let lowest_unsettled = [
            self.in_flight.keys().next().copied(),
            self.held.keys().next().copied(),
            self.buffer.front().map(|record| record.position),
            Some(self.cursor),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(self.cursor);
        lowest_unsettled.checked_sub(1).filter(|position| *position > 0)
    }

    /// Earliest redelivery deadline among in-flight records.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|flight| flight.redeliver_at).min()
    }
}
