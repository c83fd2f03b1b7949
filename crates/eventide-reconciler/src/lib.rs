//! Read-path reconciliation for eventide.
//!
//! A [`consumer::Reconciler`] drains a category subscription, decodes each
//! record and hands it to a [`dispatcher::Dispatcher`], whose handlers keep
//! read models ([`read_model`]) and integration notifications
//! ([`integration`]) in step with the event log.

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod integration;
pub mod read_model;
