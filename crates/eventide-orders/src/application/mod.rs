//! Application layer for the Orders context.

pub mod command_handlers;
pub mod notifications;
pub mod projections;
pub mod query_handlers;
pub mod read_path;
