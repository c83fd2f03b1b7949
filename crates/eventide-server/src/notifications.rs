//! In-process consumer of published integration events.

use eventide_reconciler::integration::IntegrationEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// Logs every integration event published on `notifications` until the sink
/// is dropped. The task yields how many events it logged.
pub fn spawn_notification_log(
    mut notifications: broadcast::Receiver<IntegrationEvent>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut logged = 0;
        loop {
            match notifications.recv().await {
                Ok(event) => {
                    logged += 1;
                    tracing::info!(
                        message_id = %event.message_id,
                        event_type = %event.event_type,
                        entity_id = %event.entity_id,
                        entity_version = event.entity_version,
                        correlation_id = %event.correlation_id,
                        "integration event published"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "notification log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
        logged
    })
}
