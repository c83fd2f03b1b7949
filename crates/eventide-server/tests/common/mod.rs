//! Shared test helpers for server integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use eventide_core::aggregate::AggregateRoot;
use eventide_core::repository::DeleteMode;
use eventide_event_store::memory::InMemoryEventStore;
use eventide_orders::application::read_path::order_dispatcher;
use eventide_orders::domain::aggregates::Order;
use eventide_reconciler::consumer::{Reconciler, ReconcilerConfig, ReconcilerHandle};
use eventide_reconciler::integration::BroadcastNotificationSink;
use eventide_reconciler::read_model::InMemoryReadModelStore;
use eventide_server::state::AppState;
use eventide_test_support::FixedClock;
use http_body_util::BodyExt;
use tower::ServiceExt;

pub const CONSUMER_GROUP: &str = "orders-read-model";

/// In-memory application with a running order reconciler.
pub struct TestApp {
    pub router: Router,
    pub reconciler: ReconcilerHandle,
}

/// Build the full app router over in-memory backends and start the order
/// reconciler. Uses the same wiring as `main.rs`.
pub async fn build_test_app(delete_mode: DeleteMode) -> TestApp {
    let event_store = Arc::new(InMemoryEventStore::new());
    let read_models = Arc::new(InMemoryReadModelStore::new());
    let dispatcher = order_dispatcher(
        read_models.clone(),
        Arc::new(BroadcastNotificationSink::new(16)),
    )
    .unwrap();
    let config = ReconcilerConfig {
        retry_min_delay: Duration::from_millis(5),
        retry_max_delay: Duration::from_millis(20),
        ..ReconcilerConfig::new(CONSUMER_GROUP)
    };
    let reconciler = Reconciler::new(
        event_store.clone(),
        Order::AGGREGATE_TYPE,
        dispatcher,
        config,
    )
    .start()
    .await
    .unwrap();

    let state = AppState::new(
        event_store,
        Arc::new(FixedClock::default()),
        delete_mode,
        read_models,
        CONSUMER_GROUP,
    );
    TestApp {
        router: eventide_server::app(state),
        reconciler,
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();
    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

/// Send a DELETE request and return the response.
pub async fn delete(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

/// Polls `uri` until it answers with `status`, for up to two seconds.
pub async fn eventually(app: &Router, uri: &str, status: StatusCode) -> serde_json::Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let (current, json) = get_json(app.clone(), uri).await;
        if current == status {
            return json;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{uri} still answers {current}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
