//! Route modules.

pub mod health;
pub mod operator;
pub mod orders;
