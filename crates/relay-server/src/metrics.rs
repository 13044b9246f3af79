//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `GET /metrics`. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Connections that passed admission (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections refused at admission (counter, labels: reason).
pub const CONNECTIONS_REJECTED_TOTAL: &str = "relay_connections_rejected_total";
/// Currently open admitted connections (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Connection lifetime (histogram).
pub const CONNECTION_DURATION_SECONDS: &str = "relay_connection_duration_seconds";
/// Inbound frames routed (counter).
pub const FRAMES_TOTAL: &str = "relay_frames_total";
/// Protocol error replies (counter, labels: error).
pub const PROTOCOL_ERRORS_TOTAL: &str = "relay_protocol_errors_total";
/// In-band health checks answered (counter).
pub const HEALTH_CHECKS_TOTAL: &str = "relay_health_checks_total";
/// Frames queued to recipients by broadcast (counter).
pub const BROADCAST_DELIVERIES_TOTAL: &str = "relay_broadcast_deliveries_total";
/// Frames dropped on full recipient queues (counter).
pub const BROADCAST_DROPS_TOTAL: &str = "relay_broadcast_drops_total";
/// Recipients evicted after failed delivery (counter).
pub const BROADCAST_EVICTIONS_TOTAL: &str = "relay_broadcast_evictions_total";
/// Sessions closed by the keep-alive timeout (counter).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "relay_heartbeat_timeouts_total";
