//! Router assembly, startup and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use rollcall_core::{AttendanceHistory, IdentityService, PersistenceStore, RosterStore};
use rollcall_store::{AttendanceRepo, ClassRepo, Database};

use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::http;
use crate::registry::{self, ConnectionRegistry};
use crate::shutdown::{ShutdownCoordinator, DEFAULT_SHUTDOWN_TIMEOUT};

/// External systems the coordinator talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Verifies bearer tokens.
    pub identity: Arc<dyn IdentityService>,
    /// Class teachers and rosters.
    pub roster: Arc<dyn RosterStore>,
    /// Sink for closed sessions.
    pub persistence: Arc<dyn PersistenceStore>,
    /// Read side for students' past marks.
    pub history: Arc<dyn AttendanceHistory>,
}

impl Collaborators {
    /// Roster and attendance backed by one SQLite database.
    pub fn sqlite(db: Database, identity: Arc<dyn IdentityService>) -> Self {
        let attendance = Arc::new(AttendanceRepo::new(db.clone()));
        Self {
            identity,
            roster: Arc::new(ClassRepo::new(db)),
            persistence: attendance.clone(),
            history: attendance,
        }
    }
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Attached connections.
    pub registry: Arc<ConnectionRegistry>,
    /// Front door to the session owner.
    pub coordinator: CoordinatorHandle,
    /// Token verification.
    pub identity: Arc<dyn IdentityService>,
    /// Roster lookups for HTTP checks.
    pub roster: Arc<dyn RosterStore>,
    /// Persisted marks.
    pub history: Arc<dyn AttendanceHistory>,
    /// Prometheus renderer; `None` disables `/metrics`.
    pub metrics: Option<PrometheusHandle>,
    /// Process start, for uptime.
    pub start_time: Instant,
    /// Ping period for new connections.
    pub heartbeat_interval: Duration,
}

/// Routes and middleware over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(http::attach))
        .route("/attendance/start", post(http::start_attendance))
        .route("/class/{id}/my-attendance", get(http::my_attendance))
        .route("/health", get(http::health))
        .route("/metrics", get(http::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// A running server.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<ShutdownCoordinator>,
    registry: Arc<ConnectionRegistry>,
    coordinator: CoordinatorHandle,
}

impl ServerHandle {
    /// Bound address; resolves port `0`.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle to the coordinator, e.g. to inspect the active session.
    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Registered connections.
    pub fn connections(&self) -> usize {
        self.registry.count()
    }

    /// Stop accepting, release every connection and wait for background
    /// tasks to finish.
    pub async fn stop(self) {
        info!(connections = self.registry.count(), "shutting down");
        self.shutdown.trigger();
        self.registry.close_all();
        let aborted = self.shutdown.drain(DEFAULT_SHUTDOWN_TIMEOUT).await;
        info!(aborted = aborted.len(), "shutdown complete");
    }
}

/// Bind, then spawn the coordinator, sweeper and HTTP server, and return at once.
pub async fn start(
    config: &ServerConfig,
    collaborators: Collaborators,
    metrics: Option<PrometheusHandle>,
) -> std::io::Result<ServerHandle> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "listening");

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));

    let coordinator = Coordinator::new(
        registry.clone(),
        collaborators.roster.clone(),
        collaborators.persistence.clone(),
        config.close_timeout(),
    );
    let (handle, coordinator_task) = coordinator.spawn(config.command_queue, shutdown.token());
    shutdown.track("coordinator", coordinator_task);

    shutdown.spawn(
        "sweeper",
        registry::run_sweeper(
            registry.clone(),
            config.heartbeat_interval(),
            config.client_timeout(),
            shutdown.token(),
        ),
    );

    let state = AppState {
        registry: registry.clone(),
        coordinator: handle.clone(),
        identity: collaborators.identity,
        roster: collaborators.roster,
        history: collaborators.history,
        metrics,
        start_time: Instant::now(),
        heartbeat_interval: config.heartbeat_interval(),
    };

    let token = shutdown.token();
    let app = router(state);
    shutdown.spawn("http", async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move { token.cancelled().await });
        if let Err(e) = serve.await {
            error!(error = %e, "http server failed");
        }
    });

    Ok(ServerHandle {
        addr,
        shutdown,
        registry,
        coordinator: handle,
    })
}
