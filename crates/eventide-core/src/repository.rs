//! Event-sourcing repository: load, save and delete aggregates.
//!
//! Saving only appends to the event store. Nothing is published from here;
//! read models catch up through durable subscriptions on the same log.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, AggregateRoot, rehydrate};
use crate::clock::Clock;
use crate::codec;
use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::record::{self, Direction, ExpectedVersion, ReadStart};
use crate::store::EventStore;

/// Per-repository deletion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    /// Removal is rejected.
    Disabled,
    /// Removal appends a tombstone event; the stream stays intact.
    #[default]
    Soft,
    /// Removal physically deletes the stream.
    Hard,
}

impl FromStr for DeleteMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(Self::Disabled),
            "soft" => Ok(Self::Soft),
            "hard" => Ok(Self::Hard),
            other => Err(DomainError::Validation(format!(
                "unknown delete mode {other:?}, expected disabled, soft or hard"
            ))),
        }
    }
}

impl fmt::Display for DeleteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disabled => "disabled",
            Self::Soft => "soft",
            Self::Hard => "hard",
        })
    }
}

/// Loads and persists aggregates of one type through an [`EventStore`].
pub struct EventSourcingRepository<R> {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    delete_mode: DeleteMode,
    _entity: PhantomData<fn() -> R>,
}

impl<R> Clone for EventSourcingRepository<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            delete_mode: self.delete_mode,
            _entity: PhantomData,
        }
    }
}

impl<R> fmt::Debug for EventSourcingRepository<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSourcingRepository")
            .field("entity", &std::any::type_name::<R>())
            .field("delete_mode", &self.delete_mode)
            .finish_non_exhaustive()
    }
}

impl<R: AggregateRoot> EventSourcingRepository<R> {
    /// Creates a repository over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>, delete_mode: DeleteMode) -> Self {
        Self {
            store,
            clock,
            delete_mode,
            _entity: PhantomData,
        }
    }

    /// Returns the configured delete mode.
    #[must_use]
    pub fn delete_mode(&self) -> DeleteMode {
        self.delete_mode
    }

    /// Returns the clock used for repository-generated events.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Loads an aggregate. Soft-deleted aggregates are reported as missing.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the stream does not exist
    /// or ends with a tombstone, `DomainError::Encoding` if a stored event
    /// cannot be decoded.
    pub async fn get(&self, id: &str) -> Result<Aggregate<R>, DomainError> {
        let aggregate = self.get_including_deleted(id).await?;
        if aggregate.is_deleted() {
            return Err(DomainError::AggregateNotFound(id.to_owned()));
        }
        Ok(aggregate)
    }

    /// Loads an aggregate even if it was soft deleted.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the stream does not exist,
    /// `DomainError::Encoding` if a stored event cannot be decoded.
    pub async fn get_including_deleted(&self, id: &str) -> Result<Aggregate<R>, DomainError> {
        let stream_id = record::stream_id(R::AGGREGATE_TYPE, id);
        let records = match self
            .store
            .read(&stream_id, Direction::Forward, ReadStart::Start, None)
            .await
        {
            Ok(records) => records,
            Err(DomainError::StreamNotFound(_)) => {
                return Err(DomainError::AggregateNotFound(id.to_owned()));
            }
            Err(e) => return Err(e),
        };
        let events = records
            .iter()
            .map(|stored| {
                codec::decode::<R::Event>(stored).map_err(|e| {
                    DomainError::Encoding(format!("event deserialization failed: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        rehydrate(id, events)
    }

    /// Persists a new aggregate. The stream must not exist yet.
    ///
    /// Returns the persisted version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoPendingEvents` if nothing was recorded and
    /// `DomainError::ConcurrencyConflict` if the stream already exists.
    pub async fn add(&self, aggregate: &mut Aggregate<R>) -> Result<i64, DomainError> {
        self.save(aggregate, ExpectedVersion::NoStream).await
    }

    /// Persists pending events of a loaded aggregate.
    ///
    /// Pending events are kept when the append fails; on conflict the caller
    /// reloads and retries.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoPendingEvents` if nothing was recorded and
    /// `DomainError::ConcurrencyConflict` if another writer got there first.
    pub async fn update(&self, aggregate: &mut Aggregate<R>) -> Result<i64, DomainError> {
        let expected = ExpectedVersion::from(aggregate.version());
        self.save(aggregate, expected).await
    }

    async fn save(
        &self,
        aggregate: &mut Aggregate<R>,
        expected: ExpectedVersion,
    ) -> Result<i64, DomainError> {
        if aggregate.pending_events().is_empty() {
            return Err(DomainError::NoPendingEvents(aggregate.id().to_owned()));
        }
        let events = aggregate
            .pending_events()
            .iter()
            .map(codec::encode)
            .collect::<Result<Vec<_>, _>>()?;
        let stream_id = aggregate.stream_id();
        let count = events.len();

        let stored_version = self.store.append(&stream_id, expected, events).await?;
        let version = aggregate.mark_committed();
        if stored_version != version {
            tracing::warn!(
                stream_id = %stream_id,
                stored_version,
                version,
                "store reported a different stream version than the aggregate"
            );
        }

        tracing::debug!(stream_id = %stream_id, %expected, version, count, "appended events");
        Ok(version)
    }

    /// Removes an aggregate according to the repository's delete mode.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::DeleteDisabled` in disabled mode and
    /// `DomainError::AggregateNotFound` if there is nothing to delete.
    pub async fn remove(&self, id: &str, correlation_id: Uuid) -> Result<(), DomainError> {
        match self.delete_mode {
            DeleteMode::Disabled => Err(DomainError::DeleteDisabled(id.to_owned())),
            DeleteMode::Soft => {
                let mut aggregate = self.get(id).await?;
                aggregate.record(
                    R::Event::tombstone(id),
                    correlation_id,
                    self.clock.as_ref(),
                )?;
                self.update(&mut aggregate).await?;
                tracing::info!(stream_id = %aggregate.stream_id(), "soft deleted aggregate");
                Ok(())
            }
            DeleteMode::Hard => {
                let stream_id = record::stream_id(R::AGGREGATE_TYPE, id);
                match self.store.delete(&stream_id).await {
                    Ok(()) => {
                        tracing::info!(stream_id = %stream_id, "hard deleted aggregate");
                        Ok(())
                    }
                    Err(DomainError::StreamNotFound(_)) => {
                        Err(DomainError::AggregateNotFound(id.to_owned()))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}
