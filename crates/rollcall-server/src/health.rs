//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

use crate::session::SessionInfo;

/// `/health` body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Registered WebSocket connections.
    pub connections: usize,
    /// The running session, `null` when idle.
    pub active_session: Option<SessionInfo>,
}

/// Build the health body from live server state.
pub fn health_check(start_time: Instant, connections: usize, active_session: Option<SessionInfo>) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_session,
    }
}
