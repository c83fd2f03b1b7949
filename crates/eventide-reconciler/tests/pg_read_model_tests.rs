//! Integration tests for `PgReadModelStore`. Require a running `PostgreSQL`.

use eventide_reconciler::read_model::{PgReadModelStore, ReadModelStore};
use serde_json::json;
use sqlx::PgPool;

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires PostgreSQL"]
async fn test_upsert_get_list_delete(pool: PgPool) {
    let store = PgReadModelStore::new(pool);

    store
        .upsert("orders", "O2", json!({"id": "O2", "items": []}))
        .await
        .unwrap();
    store
        .upsert("orders", "O1", json!({"id": "O1", "items": []}))
        .await
        .unwrap();
    store
        .upsert("orders", "O1", json!({"id": "O1", "items": ["X"]}))
        .await
        .unwrap();

    assert_eq!(
        store.get("orders", "O1").await.unwrap(),
        Some(json!({"id": "O1", "items": ["X"]}))
    );
    let listed = store.list("orders").await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["id"], "O1");
    assert!(store.delete("orders", "O1").await.unwrap());
    assert_eq!(store.get("orders", "O1").await.unwrap(), None);
}
