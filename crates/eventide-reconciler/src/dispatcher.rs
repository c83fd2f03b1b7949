//! Static, stage-ordered routing of decoded events to their handlers.
//!
//! Handlers are registered once through a [`DispatcherBuilder`] and resolved
//! into a per-kind route table when the dispatcher is built. Every event is
//! handed to its handlers one at a time: pre-behaviours, projections,
//! integration emitters, post-behaviours, each group in registration order.
//! The first failure stops the pipeline.
//!
//! Hard deletes leave no decodable event behind, only a marker record. Those
//! are reported once per handler through [`EventHandler::stream_deleted`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use eventide_core::event::{DomainEvent, EventEnvelope};
use eventide_core::record::EventRecord;

use crate::error::{DispatchError, DispatcherBuildError, HandlerError};

/// Reacts to decoded domain events. Handlers must be idempotent: a record
/// may be delivered more than once.
#[async_trait]
pub trait EventHandler<E: DomainEvent>: Send + Sync {
    /// Name used in logs and error reports.
    fn name(&self) -> &str;

    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Returns a `HandlerError` if the event could not be handled; the record
    /// will be redelivered.
    async fn handle(&self, event: &EventEnvelope<E>) -> Result<(), HandlerError>;

    /// Handles the hard deletion of an entity's stream. The default does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns a `HandlerError` if the deletion could not be applied; the
    /// marker record will be redelivered.
    async fn stream_deleted(&self, _deleted: &StreamDeleted) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// A stream removed by a hard delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDeleted {
    /// Id of the deleted stream.
    pub stream_id: String,
    /// Entity the stream belonged to.
    pub entity_id: String,
    /// Last version the entity reached before deletion.
    pub last_version: i64,
}

impl StreamDeleted {
    /// Builds the deletion described by a tombstone marker record, or `None`
    /// for any other record.
    #[must_use]
    pub fn from_marker(record: &EventRecord) -> Option<Self> {
        let stream_id = record.deleted_stream()?;
        let entity_id = stream_id
            .split_once('-')
            .map_or(stream_id, |(_, id)| id);
        Some(Self {
            stream_id: stream_id.to_owned(),
            entity_id: entity_id.to_owned(),
            last_version: record.metadata.entity_version,
        })
    }
}

/// Pipeline stage a handler belongs to. Stages run in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Runs before projections.
    Pre,
    /// Read-model writers.
    Projection,
    /// Integration notification emitters.
    Integration,
    /// Runs last.
    Post,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pre => "pre",
            Self::Projection => "projection",
            Self::Integration => "integration",
            Self::Post => "post",
        };
        f.write_str(name)
    }
}

/// Which event kinds a handler is registered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindFilter {
    /// Every kind of the event type.
    All,
    /// Only the listed kinds.
    Only(Vec<&'static str>),
}

impl KindFilter {
    /// Builds a filter for the given kinds.
    #[must_use]
    pub fn kinds(kinds: &[&'static str]) -> Self {
        Self::Only(kinds.to_vec())
    }

    fn matches(&self, kind: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(kinds) => kinds.iter().any(|k| *k == kind),
        }
    }
}

struct Route<E: DomainEvent> {
    stage: Stage,
    handler: Arc<dyn EventHandler<E>>,
}

impl<E: DomainEvent> Clone for Route<E> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage,
            handler: Arc::clone(&self.handler),
        }
    }
}

/// Collects handler registrations for a [`Dispatcher`].
pub struct DispatcherBuilder<E: DomainEvent> {
    registrations: Vec<(KindFilter, Route<E>)>,
}

impl<E: DomainEvent> Default for DispatcherBuilder<E> {
    fn default() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }
}

impl<E: DomainEvent> DispatcherBuilder<E> {
    /// Registers a handler in `stage` for the kinds selected by `filter`.
    #[must_use]
    pub fn register(
        mut self,
        stage: Stage,
        filter: KindFilter,
        handler: Arc<dyn EventHandler<E>>,
    ) -> Self {
        self.registrations.push((filter, Route { stage, handler }));
        self
    }

    /// Registers a pre-behaviour.
    #[must_use]
    pub fn pre(self, filter: KindFilter, handler: Arc<dyn EventHandler<E>>) -> Self {
        self.register(Stage::Pre, filter, handler)
    }

    /// Registers a projection handler.
    #[must_use]
    pub fn projection(self, filter: KindFilter, handler: Arc<dyn EventHandler<E>>) -> Self {
        self.register(Stage::Projection, filter, handler)
    }

    /// Registers an integration emitter.
    #[must_use]
    pub fn integration(self, filter: KindFilter, handler: Arc<dyn EventHandler<E>>) -> Self {
        self.register(Stage::Integration, filter, handler)
    }

    /// Registers a post-behaviour.
    #[must_use]
    pub fn post(self, filter: KindFilter, handler: Arc<dyn EventHandler<E>>) -> Self {
        self.register(Stage::Post, filter, handler)
    }

    /// Validates the registrations and resolves the route table.
    ///
    /// # Errors
    ///
    /// Returns `DispatcherBuildError::UnknownEventKind` if a filter names a
    /// kind outside `E::KINDS`, `DispatcherBuildError::NoKinds` for an empty
    /// filter.
    pub fn build(self) -> Result<Dispatcher<E>, DispatcherBuildError> {
        for (filter, route) in &self.registrations {
            if let KindFilter::Only(kinds) = filter {
                if kinds.is_empty() {
                    return Err(DispatcherBuildError::NoKinds(route.handler.name().to_owned()));
                }
                if let Some(unknown) = kinds.iter().find(|kind| !E::KINDS.contains(*kind)) {
                    return Err(DispatcherBuildError::UnknownEventKind {
                        handler: route.handler.name().to_owned(),
                        kind: (*unknown).to_owned(),
                    });
                }
            }
        }

        let mut routes = HashMap::with_capacity(E::KINDS.len());
        for kind in E::KINDS {
            let mut matching: Vec<Route<E>> = self
                .registrations
                .iter()
                .filter(|(filter, _)| filter.matches(kind))
                .map(|(_, route)| route.clone())
                .collect();
            // Stable: registration order is kept within a stage.
            matching.sort_by_key(|route| route.stage);
            routes.insert(*kind, matching);
        }

        let mut deletions: Vec<Route<E>> = Vec::new();
        for (_, route) in self.registrations {
            let seen = deletions
                .iter()
                .any(|known| Arc::ptr_eq(&known.handler, &route.handler));
            if route.stage != Stage::Integration && !seen {
                deletions.push(route);
            }
        }
        deletions.sort_by_key(|route| route.stage);
        Ok(Dispatcher { routes, deletions })
    }
}

/// Routes decoded events to their registered handlers.
pub struct Dispatcher<E: DomainEvent> {
    routes: HashMap<&'static str, Vec<Route<E>>>,
    /// Every non-integration handler once, in stage order.
    deletions: Vec<Route<E>>,
}

impl<E: DomainEvent> fmt::Debug for Dispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<(&str, Vec<&str>)> = self
            .routes
            .iter()
            .map(|(kind, routes)| (*kind, routes.iter().map(|r| r.handler.name()).collect()))
            .collect();
        routes.sort_unstable();
        f.debug_struct("Dispatcher").field("routes", &routes).finish()
    }
}

impl<E: DomainEvent> Dispatcher<E> {
    /// Starts a new builder.
    #[must_use]
    pub fn builder() -> DispatcherBuilder<E> {
        DispatcherBuilder::default()
    }

    /// Names of the handlers `kind` is routed to, in invocation order.
    #[must_use]
    pub fn handlers_for(&self, kind: &str) -> Vec<&str> {
        self.routes
            .get(kind)
            .map(|routes| routes.iter().map(|r| r.handler.name()).collect())
            .unwrap_or_default()
    }

    /// Invokes every handler registered for the event's kind, sequentially.
    /// Soft-delete tombstones skip the integration stage.
    ///
    /// # Errors
    ///
    /// Returns the first handler failure; later handlers are not invoked.
    pub async fn dispatch(&self, event: &EventEnvelope<E>) -> Result<(), DispatchError> {
        let Some(routes) = self.routes.get(event.event_type()) else {
            tracing::trace!(event_type = event.event_type(), "no handlers registered");
            return Ok(());
        };
        let tombstone = event.is_tombstone();
        for route in routes {
            if tombstone && route.stage == Stage::Integration {
                continue;
            }
            let handler = route.handler.name();
            tracing::debug!(
                stage = %route.stage,
                handler,
                event_type = event.event_type(),
                entity_id = %event.metadata.entity_id,
                version = event.version(),
                "invoking handler"
            );
            route
                .handler
                .handle(event)
                .await
                .map_err(|source| DispatchError {
                    stage: route.stage,
                    handler: handler.to_owned(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Reports a hard-deleted stream to every registered handler outside the
    /// integration stage, each once, in stage order.
    ///
    /// # Errors
    ///
    /// Returns the first handler failure; later handlers are not invoked.
    pub async fn dispatch_stream_deleted(
        &self,
        deleted: &StreamDeleted,
    ) -> Result<(), DispatchError> {
        for route in &self.deletions {
            let handler = route.handler.name();
            tracing::debug!(
                stage = %route.stage,
                handler,
                stream_id = %deleted.stream_id,
                "reporting deleted stream"
            );
            route
                .handler
                .stream_deleted(deleted)
                .await
                .map_err(|source| DispatchError {
                    stage: route.stage,
                    handler: handler.to_owned(),
                    source,
                })?;
        }
        Ok(())
    }
}
