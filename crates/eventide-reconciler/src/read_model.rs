//! Read-model document storage.
//!
//! Projection handlers are the only writers; queries only read.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use tokio::sync::RwLock;

use crate::error::ReadModelError;

/// Keyed JSON documents grouped in collections.
#[async_trait]
pub trait ReadModelStore: Send + Sync {
    /// Inserts or replaces a document.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Infrastructure` on storage failure.
    async fn upsert(&self, collection: &str, id: &str, document: Value)
    -> Result<(), ReadModelError>;

    /// Fetches a document.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Infrastructure` on storage failure.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, ReadModelError>;

    /// Removes a document. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Infrastructure` on storage failure.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, ReadModelError>;

    /// Lists all documents of a collection, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns `ReadModelError::Infrastructure` on storage failure.
    async fn list(&self, collection: &str) -> Result<Vec<Value>, ReadModelError>;
}

/// In-process read-model store.
#[derive(Debug, Default)]
pub struct InMemoryReadModelStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryReadModelStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadModelStore for InMemoryReadModelStore {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        document: Value,
    ) -> Result<(), ReadModelError> {
        self.collections
            .write()
            .await
            .entry(collection.to_owned())
            .or_default()
            .insert(id.to_owned(), document);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, ReadModelError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, ReadModelError> {
        Ok(self
            .collections
            .write()
            .await
            .get_mut(collection)
            .is_some_and(|documents| documents.remove(id).is_some()))
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>, ReadModelError> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|documents| documents.values().cloned().collect())
            .unwrap_or_default())
    }
}

/// PostgreSQL-backed read-model store (`read_models` table, JSONB documents).
#[derive(Debug, Clone)]
pub struct PgReadModelStore {
    pool: PgPool,
}

impl PgReadModelStore {
    /// Creates a new `PgReadModelStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReadModelStore for PgReadModelStore {
    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        document: Value,
    ) -> Result<(), ReadModelError> {
        sqlx::query(
            r"
            INSERT INTO read_models (collection, id, document)
            VALUES ($1, $2, $3)
            ON CONFLICT (collection, id) DO UPDATE
            SET document = EXCLUDED.document, updated_at = NOW()
            ",
        )
        .bind(collection)
        .bind(id)
        .bind(Json(document))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, ReadModelError> {
        let document: Option<Json<Value>> = sqlx::query_scalar(
            "SELECT document FROM read_models WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(document.map(|Json(value)| value))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, ReadModelError> {
        let result = sqlx::query("DELETE FROM read_models WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>, ReadModelError> {
        let documents: Vec<Json<Value>> = sqlx::query_scalar(
            "SELECT document FROM read_models WHERE collection = $1 ORDER BY id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(documents.into_iter().map(|Json(value)| value).collect())
    }
}
