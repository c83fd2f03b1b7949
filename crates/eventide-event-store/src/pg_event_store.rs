//! `PostgreSQL` implementation of the `EventStore` trait.
//!
//! Appends and deletes serialize on a transaction-scoped advisory lock, so
//! global positions become visible in commit order and a subscription scanning
//! by position never skips a record committed late.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use eventide_core::error::DomainError;
use eventide_core::record::{
    self, Direction, EventRecord, ExpectedVersion, NewEvent, ParkedRecord, ReadStart,
    RecordMetadata, STREAM_DELETED_EVENT_TYPE, TOMBSTONE_CONTENT_TYPE,
};
use eventide_core::store::{EventStore, Subscription};

use crate::subscription::{CategoryLog, HeadWatch, LogSubscription, SubscriptionSettings};

/// Advisory lock key guarding writes to `event_records`.
const APPEND_LOCK_KEY: i64 = 0x6576_656e_7469_6465;

const RECORD_COLUMNS: &str = "position, record_id, stream_id, category, stream_offset, \
     event_type, content_type, payload, entity_version, correlation_id, causation_id, occurred_at";

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    settings: SubscriptionSettings,
}

impl PgEventStore {
    /// Creates a new `PgEventStore` with default subscription settings.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self::with_settings(pool, SubscriptionSettings::default())
    }

    /// Creates a new `PgEventStore` with the given subscription settings.
    #[must_use]
    pub fn with_settings(pool: PgPool, settings: SubscriptionSettings) -> Self {
        Self { pool, settings }
    }

    /// Starts a write transaction holding the store-wide append lock.
    ///
    /// Writers are serialized so global positions commit in allocation
    /// order. Without it a later position could become visible before an
    /// earlier one commits, and a subscription scanning past the gap would
    /// advance its checkpoint over a record it never saw. Appends to
    /// unrelated streams therefore never run concurrently.
    async fn begin_locked(&self) -> Result<Transaction<'static, Postgres>, DomainError> {
        let mut tx = self.pool.begin().await.map_err(infrastructure)?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(infrastructure)?;
        Ok(tx)
    }
}

fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

fn to_position(value: i64) -> Result<u64, DomainError> {
    u64::try_from(value)
        .map_err(|_| DomainError::Infrastructure(format!("negative log position {value}")))
}

fn to_db_position(position: u64) -> Result<i64, DomainError> {
    i64::try_from(position)
        .map_err(|_| DomainError::Validation(format!("log position {position} out of range")))
}

fn to_db_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn record_from_row(row: &PgRow) -> Result<EventRecord, sqlx::Error> {
    let position: i64 = row.try_get("position")?;
    Ok(EventRecord {
        position: u64::try_from(position).map_err(|e| sqlx::Error::ColumnDecode {
            index: "position".to_owned(),
            source: Box::new(e),
        })?,
        record_id: row.try_get("record_id")?,
        stream_id: row.try_get("stream_id")?,
        category: row.try_get("category")?,
        offset: row.try_get("stream_offset")?,
        event_type: row.try_get("event_type")?,
        content_type: row.try_get("content_type")?,
        payload: row.try_get("payload")?,
        metadata: RecordMetadata {
            entity_version: row.try_get("entity_version")?,
            occurred_at: row.try_get("occurred_at")?,
            correlation_id: row.try_get("correlation_id")?,
            causation_id: row.try_get("causation_id")?,
        },
    })
}

fn parked_from_row(row: &PgRow) -> Result<ParkedRecord, sqlx::Error> {
    let position: i64 = row.try_get("position")?;
    let delivery_count: i32 = row.try_get("delivery_count")?;
    let decode = |index: &str, e: std::num::TryFromIntError| sqlx::Error::ColumnDecode {
        index: index.to_owned(),
        source: Box::new(e),
    };
    Ok(ParkedRecord {
        position: u64::try_from(position).map_err(|e| decode("position", e))?,
        record_id: row.try_get("record_id")?,
        stream_id: row.try_get("stream_id")?,
        event_type: row.try_get("event_type")?,
        delivery_count: u32::try_from(delivery_count).map_err(|e| decode("delivery_count", e))?,
        reason: row.try_get("reason")?,
        parked_at: row.try_get("parked_at")?,
    })
}

async fn stream_version(
    executor: impl sqlx::PgExecutor<'_>,
    stream_id: &str,
) -> Result<i64, DomainError> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(MAX(stream_offset), -1) FROM event_records WHERE stream_id = $1",
    )
    .bind(stream_id)
    .fetch_one(executor)
    .await
    .map_err(infrastructure)
}

#[allow(clippy::too_many_arguments)]
async fn insert_record(
    tx: &mut Transaction<'static, Postgres>,
    record_id: Uuid,
    stream_id: &str,
    offset: i64,
    event_type: &str,
    content_type: &str,
    payload: &[u8],
    metadata: &RecordMetadata,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r"
        INSERT INTO event_records
            (record_id, stream_id, category, stream_offset, event_type, content_type,
             payload, entity_version, correlation_id, causation_id, occurred_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ",
    )
    .bind(record_id)
    .bind(stream_id)
    .bind(record::category_of(stream_id))
    .bind(offset)
    .bind(event_type)
    .bind(content_type)
    .bind(payload)
    .bind(metadata.entity_version)
    .bind(metadata.correlation_id)
    .bind(metadata.causation_id)
    .bind(metadata.occurred_at)
    .execute(&mut **tx)
    .await
    .map(|_| ())
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<i64, DomainError> {
        if events.is_empty() {
            return Err(DomainError::Validation(format!(
                "cannot append an empty batch to {stream_id}"
            )));
        }
        let mut tx = self.begin_locked().await?;

        let deleted: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM deleted_streams WHERE stream_id = $1)",
        )
        .bind(stream_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(infrastructure)?;
        if deleted {
            return Err(DomainError::StreamDeleted(stream_id.to_owned()));
        }

        let current = stream_version(&mut *tx, stream_id).await?;
        if !expected.matches(current) {
            return Err(DomainError::ConcurrencyConflict {
                stream_id: stream_id.to_owned(),
                expected,
                actual: current,
            });
        }

        let mut offset = current;
        for event in &events {
            offset += 1;
            insert_record(
                &mut tx,
                event.event_id,
                stream_id,
                offset,
                &event.event_type,
                &event.content_type,
                &event.payload,
                &event.metadata,
            )
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    DomainError::ConcurrencyConflict {
                        stream_id: stream_id.to_owned(),
                        expected,
                        actual: current,
                    }
                }
                other => infrastructure(other),
            })?;
        }
        tx.commit().await.map_err(infrastructure)?;

        tracing::debug!(stream_id, version = offset, count = events.len(), "appended events");
        Ok(offset)
    }

    async fn read(
        &self,
        stream_id: &str,
        direction: Direction,
        start: ReadStart,
        count: Option<usize>,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let last = stream_version(&self.pool, stream_id).await?;
        if last < 0 {
            return Err(DomainError::StreamNotFound(stream_id.to_owned()));
        }
        let from = match start {
            ReadStart::Start => 0,
            ReadStart::End => last,
            ReadStart::Offset(offset) => offset,
        };
        let sql = match direction {
            Direction::Forward => format!(
                "SELECT {RECORD_COLUMNS} FROM event_records \
                 WHERE stream_id = $1 AND stream_offset >= $2 \
                 ORDER BY stream_offset ASC LIMIT $3"
            ),
            Direction::Backward => format!(
                "SELECT {RECORD_COLUMNS} FROM event_records \
                 WHERE stream_id = $1 AND stream_offset <= $2 \
                 ORDER BY stream_offset DESC LIMIT $3"
            ),
        };

        let rows = sqlx::query(&sql)
            .bind(stream_id)
            .bind(from)
            .bind(count.map_or(i64::MAX, to_db_limit))
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;
        rows.iter()
            .map(record_from_row)
            .collect::<Result<_, _>>()
            .map_err(infrastructure)
    }

    async fn delete(&self, stream_id: &str) -> Result<(), DomainError> {
        let mut tx = self.begin_locked().await?;
        let last = stream_version(&mut *tx, stream_id).await?;
        if last < 0 {
            return Err(DomainError::StreamNotFound(stream_id.to_owned()));
        }

        let removed = sqlx::query("DELETE FROM event_records WHERE stream_id = $1")
            .bind(stream_id)
            .execute(&mut *tx)
            .await
            .map_err(infrastructure)?
            .rows_affected();
        sqlx::query("INSERT INTO deleted_streams (stream_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(stream_id)
            .execute(&mut *tx)
            .await
            .map_err(infrastructure)?;

        let marker = record::tombstone_stream_id(stream_id);
        insert_record(
            &mut tx,
            Uuid::new_v4(),
            &marker,
            0,
            STREAM_DELETED_EVENT_TYPE,
            TOMBSTONE_CONTENT_TYPE,
            &[],
            &RecordMetadata {
                entity_version: last,
                occurred_at: Utc::now(),
                correlation_id: Uuid::nil(),
                causation_id: Uuid::nil(),
            },
        )
        .await
        .map_err(infrastructure)?;
        tx.commit().await.map_err(infrastructure)?;

        tracing::info!(stream_id, removed, "hard deleted stream");
        Ok(())
    }

    async fn subscribe(
        &self,
        category: &str,
        consumer_group: &str,
    ) -> Result<Arc<dyn Subscription>, DomainError> {
        let checkpoint = self.checkpoint(category, consumer_group).await?;
        Ok(Arc::new(LogSubscription::new(
            Arc::new(self.clone()),
            category,
            consumer_group,
            checkpoint,
            self.settings,
        )))
    }

    async fn checkpoint(
        &self,
        category: &str,
        consumer_group: &str,
    ) -> Result<Option<u64>, DomainError> {
        let position: Option<i64> = sqlx::query_scalar(
            "SELECT position FROM consumer_checkpoints WHERE category = $1 AND consumer_group = $2",
        )
        .bind(category)
        .bind(consumer_group)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;
        position.map(to_position).transpose()
    }

    async fn parked_records(
        &self,
        category: &str,
        consumer_group: &str,
    ) -> Result<Vec<ParkedRecord>, DomainError> {
        let rows = sqlx::query(
            r"
            SELECT position, record_id, stream_id, event_type, delivery_count, reason, parked_at
            FROM parked_records
            WHERE category = $1 AND consumer_group = $2
            ORDER BY position ASC
            ",
        )
        .bind(category)
        .bind(consumer_group)
        .fetch_all(&self.pool)
        .await
        .map_err(infrastructure)?;
        rows.iter()
            .map(parked_from_row)
            .collect::<Result<_, _>>()
            .map_err(infrastructure)
    }
}

#[async_trait]
impl CategoryLog for PgEventStore {
    async fn scan(
        &self,
        category: &str,
        from: u64,
        limit: usize,
    ) -> Result<Vec<EventRecord>, DomainError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM event_records \
             WHERE category = $1 AND position >= $2 \
             ORDER BY position ASC LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(category)
            .bind(to_db_position(from)?)
            .bind(to_db_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;
        rows.iter()
            .map(record_from_row)
            .collect::<Result<_, _>>()
            .map_err(infrastructure)
    }

    async fn store_checkpoint(
        &self,
        category: &str,
        consumer_group: &str,
        position: u64,
    ) -> Result<(), DomainError> {
        sqlx::query(
            r"
            INSERT INTO consumer_checkpoints (category, consumer_group, position)
            VALUES ($1, $2, $3)
            ON CONFLICT (category, consumer_group) DO UPDATE
            SET position = GREATEST(consumer_checkpoints.position, EXCLUDED.position),
                updated_at = NOW()
            ",
        )
        .bind(category)
        .bind(consumer_group)
        .bind(to_db_position(position)?)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(())
    }

    async fn store_parked(
        &self,
        category: &str,
        consumer_group: &str,
        parked: ParkedRecord,
    ) -> Result<(), DomainError> {
        let delivery_count = i32::try_from(parked.delivery_count).unwrap_or(i32::MAX);
        sqlx::query(
            r"
            INSERT INTO parked_records
                (category, consumer_group, position, record_id, stream_id, event_type,
                 delivery_count, reason, parked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (category, consumer_group, position) DO NOTHING
            ",
        )
        .bind(category)
        .bind(consumer_group)
        .bind(to_db_position(parked.position)?)
        .bind(parked.record_id)
        .bind(&parked.stream_id)
        .bind(&parked.event_type)
        .bind(delivery_count)
        .bind(&parked.reason)
        .bind(parked.parked_at)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(())
    }

    fn watch_head(&self) -> HeadWatch {
        HeadWatch::Poll(self.settings.poll_interval)
    }
}
