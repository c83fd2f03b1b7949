//! A minimal aggregate for exercising stores, repositories and reconcilers
//! without a real bounded context.

use eventide_core::aggregate::AggregateRoot;
use eventide_core::event::DomainEvent;
use serde::{Deserialize, Serialize};

/// Events of the [`Counter`] aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterEvent {
    /// The counter was opened.
    Opened,
    /// The counter was incremented by the given amount.
    Incremented(u32),
    /// Soft-delete tombstone.
    Closed,
}

impl DomainEvent for CounterEvent {
    const KINDS: &'static [&'static str] =
        &["counter.opened", "counter.incremented", "counter.closed"];

    fn event_type(&self) -> &'static str {
        match self {
            Self::Opened => "counter.opened",
            Self::Incremented(_) => "counter.incremented",
            Self::Closed => "counter.closed",
        }
    }

    fn tombstone(_entity_id: &str) -> Self {
        Self::Closed
    }

    fn is_tombstone(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Sums its increments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    /// Entity identifier.
    pub id: String,
    /// Running total.
    pub total: u32,
    /// Every increment, in order.
    pub increments: Vec<u32>,
}

impl AggregateRoot for Counter {
    type Event = CounterEvent;
    const AGGREGATE_TYPE: &'static str = "counter";

    fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            total: 0,
            increments: Vec::new(),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        if let CounterEvent::Incremented(n) = event {
            self.total += n;
            self.increments.push(*n);
        }
    }
}
