//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Call once at startup, before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections attached (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket connections detached (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Currently registered connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Lifetime of a connection (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Outbound messages dropped on a full queue (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Attach attempts refused for a bad credential (counter).
pub const WS_ATTACH_REJECTED_TOTAL: &str = "ws_attach_rejected_total";
/// Inbound events dispatched (counter, labels: event).
pub const EVENTS_TOTAL: &str = "events_total";
/// Inbound events answered with `ERROR` (counter, labels: kind).
pub const EVENT_ERRORS_TOTAL: &str = "event_errors_total";
/// Sessions started (counter).
pub const SESSIONS_STARTED_TOTAL: &str = "sessions_started_total";
/// Sessions closed and persisted (counter).
pub const SESSIONS_CLOSED_TOTAL: &str = "sessions_closed_total";
/// Closure attempts that failed (counter).
pub const SESSION_CLOSE_FAILURES_TOTAL: &str = "session_close_failures_total";
/// Time spent persisting one closure (histogram).
pub const SESSION_CLOSE_DURATION_SECONDS: &str = "session_close_duration_seconds";
