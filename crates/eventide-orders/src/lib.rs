//! Orders: a small bounded context exercising the eventide write and read
//! paths end to end.

pub mod application;
pub mod domain;
