use std::sync::Arc;

use relay_core::ConnectionId;
use relay_store::SubscriptionStore;
use relay_telemetry::MetricsRecorder;

use crate::protocol::{CommandResponse, CONNECTED, DISCONNECTED};

/// Handles transport connect and disconnect events.
///
/// Holds no per-connection state; a connection with no subscriptions costs
/// nothing in the store.
pub struct ConnectionLifecycle {
    store: Arc<dyn SubscriptionStore>,
    metrics: Arc<MetricsRecorder>,
}

impl ConnectionLifecycle {
    pub fn new(store: Arc<dyn SubscriptionStore>, metrics: Arc<MetricsRecorder>) -> Self {
        Self { store, metrics }
    }

    /// Always accepts.
    pub fn on_connect(&self, connection_id: &ConnectionId) -> CommandResponse {
        tracing::info!(connection_id = %connection_id, "connection opened");
        self.metrics.gauge_inc("relay_connections_active", &[], 1.0);
        CommandResponse::success(CONNECTED)
    }

    /// Drop every subscription the connection held.
    ///
    /// A store failure is reported but not retried here; any subscription
    /// left behind is pruned by the broadcast engine on its next delivery.
    pub async fn on_disconnect(&self, connection_id: &ConnectionId) -> CommandResponse {
        self.metrics.gauge_inc("relay_connections_active", &[], -1.0);

        match self.store.delete_all_for_connection(connection_id).await {
            Ok(removed) => {
                tracing::info!(connection_id = %connection_id, removed, "connection closed");
                CommandResponse::success(DISCONNECTED)
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "disconnect cleanup failed, stale subscriptions will be pruned on delivery"
                );
                self.metrics
                    .counter_inc("relay_disconnect_cleanup_failures_total", &[], 1);
                CommandResponse::error(format!("disconnect cleanup failed: {e}"))
            }
        }
    }
}
