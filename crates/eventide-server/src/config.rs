//! Server configuration read from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use eventide_core::repository::DeleteMode;
use eventide_event_store::SubscriptionSettings;
use eventide_reconciler::consumer::ReconcilerConfig;

use crate::error::AppError;

/// Consumer group of the order summary reconciler unless overridden.
pub const DEFAULT_CONSUMER_GROUP: &str = "orders-read-model";

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL URL; in-memory backends are used when absent.
    pub database_url: Option<String>,
    /// Address the HTTP server binds to.
    pub addr: SocketAddr,
    /// How the order repository deletes.
    pub delete_mode: DeleteMode,
    /// Reconciler tuning, including the consumer group.
    pub reconciler: ReconcilerConfig,
    /// Subscription tuning for the event store.
    pub subscription: SubscriptionSettings,
    /// OTLP collector endpoint; tracing export is off when absent.
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is present but invalid.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a variable is present but invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let host = non_empty("HOST").unwrap_or_else(|| "0.0.0.0".to_owned());
        let port: u16 = parse(&lookup, "PORT")?.unwrap_or(3000);
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;

        let delete_mode = match non_empty("EVENTIDE_DELETE_MODE") {
            Some(value) => value
                .parse()
                .map_err(|e| AppError::Config(format!("EVENTIDE_DELETE_MODE: {e}")))?,
            None => DeleteMode::Soft,
        };

        let mut reconciler = ReconcilerConfig::new(
            non_empty("EVENTIDE_CONSUMER_GROUP")
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_owned()),
        );
        if let Some(lanes) = parse(&lookup, "EVENTIDE_LANES")? {
            if lanes == 0 {
                return Err(AppError::Config(
                    "EVENTIDE_LANES must be at least 1".to_owned(),
                ));
            }
            reconciler.lanes = lanes;
        }
        if let Some(ms) = parse(&lookup, "EVENTIDE_HANDLER_TIMEOUT_MS")? {
            reconciler.handler_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = parse(&lookup, "EVENTIDE_MAX_DELIVERIES")? {
            reconciler.max_deliveries = max;
        }

        let mut subscription = SubscriptionSettings::default();
        if let Some(ms) = parse(&lookup, "EVENTIDE_ACK_TIMEOUT_MS")? {
            subscription.ack_timeout = Duration::from_millis(ms);
        }
        if reconciler.handler_timeout >= subscription.ack_timeout {
            return Err(AppError::Config(format!(
                "EVENTIDE_HANDLER_TIMEOUT_MS ({} ms) must be below EVENTIDE_ACK_TIMEOUT_MS ({} ms)",
                reconciler.handler_timeout.as_millis(),
                subscription.ack_timeout.as_millis()
            )));
        }

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            addr,
            delete_mode,
            reconciler,
            subscription,
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|e| AppError::Config(format!("{key} must be valid: {e}")))
        })
        .transpose()
}
