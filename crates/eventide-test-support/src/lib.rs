//! Shared test mocks and fixtures for eventide.

mod clock;
mod counter;
mod store;

pub use clock::{FixedClock, fixed_time};
pub use counter::{Counter, CounterEvent};
pub use store::FailingEventStore;
