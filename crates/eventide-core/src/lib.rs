//! Eventide core: event-sourcing abstractions.
//!
//! This crate defines the event model, the event store and subscription
//! contracts, aggregates and the event-sourcing repository. It contains no
//! infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod codec;
pub mod error;
pub mod event;
pub mod record;
pub mod repository;
pub mod store;
