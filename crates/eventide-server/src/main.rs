//! Eventide server entry point.

use std::error::Error;
use std::sync::Arc;

use eventide_core::aggregate::AggregateRoot;
use eventide_core::clock::SystemClock;
use eventide_core::store::EventStore;
use eventide_event_store::memory::InMemoryEventStore;
use eventide_event_store::pg_event_store::PgEventStore;
use eventide_orders::application::read_path::order_dispatcher;
use eventide_orders::domain::aggregates::Order;
use eventide_reconciler::consumer::Reconciler;
use eventide_reconciler::integration::BroadcastNotificationSink;
use eventide_reconciler::read_model::{InMemoryReadModelStore, PgReadModelStore, ReadModelStore};
use eventide_server::config::Config;
use eventide_server::error::AppError;
use eventide_server::notifications::spawn_notification_log;
use eventide_server::state::AppState;
use eventide_server::{app, telemetry};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const NOTIFICATION_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;
    let provider = telemetry::init_tracing(config.otlp_endpoint.as_deref())?;

    tracing::info!(
        delete_mode = %config.delete_mode,
        consumer_group = %config.reconciler.consumer_group,
        "Starting eventide server"
    );

    let result = run(config).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "server stopped with error");
    }
    telemetry::shutdown(provider);
    result.map_err(Into::into)
}

async fn run(config: Config) -> Result<(), AppError> {
    let (event_store, read_models) = backends(&config).await?;

    let notifications = BroadcastNotificationSink::new(NOTIFICATION_CAPACITY);
    let notification_log = spawn_notification_log(notifications.subscribe());
    let dispatcher = order_dispatcher(Arc::clone(&read_models), Arc::new(notifications))?;
    let reconciler = Reconciler::new(
        Arc::clone(&event_store),
        Order::AGGREGATE_TYPE,
        dispatcher,
        config.reconciler.clone(),
    )
    .start()
    .await?;

    let app_state = AppState::new(
        event_store,
        Arc::new(SystemClock),
        config.delete_mode,
        read_models,
        config.reconciler.consumer_group.clone(),
    );
    let router = app(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!("Listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining reconciler");
    reconciler.stop().await?;
    // The dispatcher held the last sink handle, so the log now ends.
    match notification_log.await {
        Ok(logged) => tracing::info!(logged, "notification log stopped"),
        Err(e) => tracing::error!(error = %e, "notification log task failed"),
    }
    Ok(())
}

async fn backends(
    config: &Config,
) -> Result<(Arc<dyn EventStore>, Arc<dyn ReadModelStore>), AppError> {
    let Some(database_url) = &config.database_url else {
        tracing::warn!("DATABASE_URL not set, using in-memory backends");
        let event_store: Arc<dyn EventStore> =
            Arc::new(InMemoryEventStore::with_settings(config.subscription));
        let read_models: Arc<dyn ReadModelStore> = Arc::new(InMemoryReadModelStore::new());
        return Ok((event_store, read_models));
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("database migrations applied");

    let event_store: Arc<dyn EventStore> =
        Arc::new(PgEventStore::with_settings(pool.clone(), config.subscription));
    let read_models: Arc<dyn ReadModelStore> = Arc::new(PgReadModelStore::new(pool));
    Ok((event_store, read_models))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
