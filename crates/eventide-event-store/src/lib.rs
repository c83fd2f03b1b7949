//! Event store backends for eventide.
//!
//! [`memory::InMemoryEventStore`] keeps everything in process;
//! [`pg_event_store::PgEventStore`] persists to `PostgreSQL`. Both share the
//! same subscription machinery, so they deliver records identically.

mod delivery;
pub mod memory;
pub mod pg_event_store;
mod subscription;

pub use subscription::SubscriptionSettings;
