//! Registry of attached, authenticated connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rollcall_core::{ConnectionId, Identity};

use crate::metrics::{WS_BROADCAST_DROPS_TOTAL, WS_CONNECTIONS_ACTIVE};
use crate::protocol::OutboundEvent;

/// Lifetime drops after which a slow client is evicted.
pub const MAX_TOTAL_DROPS: u64 = 100;

/// One attached client. The socket tasks hold the receiving end of `tx`.
pub struct Connection {
    /// Registry key.
    pub id: ConnectionId,
    /// Identity verified at attach time.
    pub identity: Identity,
    tx: mpsc::Sender<Arc<String>>,
    closed: CancellationToken,
    last_pong: Mutex<Instant>,
    dropped: AtomicU64,
}

impl Connection {
    fn new(identity: Identity, tx: mpsc::Sender<Arc<String>>) -> Self {
        Self {
            id: ConnectionId::new(),
            identity,
            tx,
            closed: CancellationToken::new(),
            last_pong: Mutex::new(Instant::now()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without waiting; a full or closed queue counts as a drop.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Messages dropped so far for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Record a pong.
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong, or since registration.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Resolves once the registry has let go of this connection.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

/// Attached connections keyed by [`ConnectionId`], each with a bounded
/// outbound queue drained by its socket writer.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    /// Registry whose per-connection queues hold `max_send_queue` messages.
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Add a verified connection and hand back its outbound queue.
    ///
    /// `CONNECTED` is queued before the entry becomes visible, so no
    /// broadcast can land ahead of it.
    pub fn register(&self, identity: Identity) -> (Arc<Connection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(self.max_send_queue.max(1));
        let greeting = OutboundEvent::Connected {
            user_id: identity.user_id.clone(),
            role: identity.role,
        };
        let connection = Arc::new(Connection::new(identity, tx));
        if let Some(message) = encode(&greeting) {
            let _ = connection.send(message);
        }
        let _ = self.connections.insert(connection.id.clone(), connection.clone());
        gauge!(WS_CONNECTIONS_ACTIVE).set(self.connections.len() as f64);
        (connection, rx)
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        match self.connections.remove(id) {
            Some((_, connection)) => {
                connection.closed.cancel();
                gauge!(WS_CONNECTIONS_ACTIVE).set(self.connections.len() as f64);
                true
            }
            None => false,
        }
    }

    /// Look up a live connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Deliver to one connection.
    pub fn unicast(&self, id: &ConnectionId, event: &OutboundEvent) -> bool {
        let Some(connection) = self.get(id) else {
            return false;
        };
        let Some(message) = encode(event) else {
            return false;
        };
        if connection.send(message) {
            true
        } else {
            self.note_drop(&connection, event);
            false
        }
    }

    /// Deliver to every registered connection; returns how many accepted it.
    ///
    /// A full queue drops the message for that connection only.
    pub fn broadcast(&self, event: &OutboundEvent) -> usize {
        let Some(message) = encode(event) else {
            return 0;
        };
        let connections: Vec<Arc<Connection>> =
            self.connections.iter().map(|entry| entry.value().clone()).collect();

        let mut delivered = 0;
        for connection in &connections {
            if connection.send(message.clone()) {
                delivered += 1;
            } else {
                self.note_drop(connection, event);
            }
        }
        debug!(
            event = event.name(),
            recipients = connections.len(),
            delivered,
            "broadcast"
        );
        delivered
    }

    /// Evict connections silent for longer than `timeout`.
    pub fn sweep(&self, timeout: Duration) -> usize {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().last_pong_elapsed() > timeout)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for id in dead {
            if self.unregister(&id) {
                removed += 1;
                info!(connection_id = %id, "evicted unresponsive client");
            }
        }
        removed
    }

    /// Release every connection, e.g. on shutdown.
    pub fn close_all(&self) {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.unregister(&id);
        }
    }

    fn note_drop(&self, connection: &Connection, event: &OutboundEvent) {
        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        let drops = connection.drop_count();
        warn!(
            connection_id = %connection.id,
            user_id = %connection.identity.user_id,
            event = event.name(),
            drops,
            "outbound queue full, message dropped"
        );
        if drops >= MAX_TOTAL_DROPS && self.unregister(&connection.id) {
            warn!(connection_id = %connection.id, drops, "evicting slow client");
        }
    }
}

fn encode(event: &OutboundEvent) -> Option<Arc<String>> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(event = event.name(), error = %e, "failed to serialize event");
            None
        }
    }
}

/// Periodically sweep dead clients until `cancel` fires.
pub async fn run_sweeper(registry: Arc<ConnectionRegistry>, every: Duration, timeout: Duration, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(every);
    let _ = tick.tick().await;
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let removed = registry.sweep(timeout);
                if removed > 0 {
                    debug!(removed, remaining = registry.count(), "liveness sweep");
                }
            }
            () = cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{AttendanceStatus, Role, UserId};

    fn mark_event() -> OutboundEvent {
        OutboundEvent::AttendanceMarked {
            student_id: UserId::from_raw("s1"),
            status: AttendanceStatus::Present,
        }
    }

    /// Register and discard the `CONNECTED` greeting.
    fn attach(registry: &ConnectionRegistry, identity: Identity) -> (Arc<Connection>, mpsc::Receiver<Arc<String>>) {
        let (conn, mut rx) = registry.register(identity);
        let greeting = rx.try_recv().unwrap();
        assert!(greeting.contains("CONNECTED"));
        (conn, rx)
    }

    #[tokio::test]
    async fn connected_is_queued_ahead_of_broadcasts() {
        let registry = ConnectionRegistry::new(8);
        let (_conn, mut rx) = registry.register(Identity::student("s1"));
        assert_eq!(registry.broadcast(&mark_event()), 1);

        let first: OutboundEvent = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(
            first,
            OutboundEvent::Connected {
                user_id: UserId::from_raw("s1"),
                role: Role::Student,
            }
        );
        let second: OutboundEvent = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(second, mark_event());
    }

    #[test]
    fn register_assigns_distinct_ids() {
        let registry = ConnectionRegistry::new(8);
        let (a, _ra) = registry.register(Identity::teacher("t1"));
        let (b, _rb) = registry.register(Identity::teacher("t1"));
        assert_ne!(a.id, b.id);
        assert_eq!(registry.count(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _rx) = registry.register(Identity::student("s1"));
        assert!(registry.unregister(&conn.id));
        assert!(!registry.unregister(&conn.id));
        assert!(conn.is_closed());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone() {
        let registry = ConnectionRegistry::new(8);
        let (_t, mut rt) = attach(&registry, Identity::teacher("t1"));
        let (_s, mut rs) = attach(&registry, Identity::student("s1"));

        assert_eq!(registry.broadcast(&mark_event()), 2);
        for rx in [&mut rt, &mut rs] {
            let msg = rx.recv().await.unwrap();
            let parsed: OutboundEvent = serde_json::from_str(&msg).unwrap();
            assert_eq!(parsed, mark_event());
        }
    }

    #[tokio::test]
    async fn unicast_reaches_only_target() {
        let registry = ConnectionRegistry::new(8);
        let (t, mut rt) = attach(&registry, Identity::teacher("t1"));
        let (_s, mut rs) = attach(&registry, Identity::student("s1"));

        assert!(registry.unicast(&t.id, &mark_event()));
        assert!(rt.recv().await.is_some());
        assert!(rs.try_recv().is_err());
    }

    #[test]
    fn unicast_to_unknown_connection_is_false() {
        let registry = ConnectionRegistry::new(8);
        assert!(!registry.unicast(&ConnectionId::from_raw("conn_missing"), &mark_event()));
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking_others() {
        let registry = ConnectionRegistry::new(1);
        let (slow, _slow_rx) = attach(&registry, Identity::student("s1"));
        let (_fast, mut fast_rx) = attach(&registry, Identity::student("s2"));

        assert_eq!(registry.broadcast(&mark_event()), 2);
        let _ = fast_rx.recv().await.unwrap();
        assert_eq!(registry.broadcast(&mark_event()), 1);
        assert_eq!(slow.drop_count(), 1);
        assert!(fast_rx.recv().await.is_some());
    }

    #[test]
    fn slow_client_is_evicted_after_max_drops() {
        let registry = ConnectionRegistry::new(1);
        let (slow, _slow_rx) = registry.register(Identity::student("s1"));
        for _ in 0..=MAX_TOTAL_DROPS {
            let _ = registry.broadcast(&mark_event());
        }
        assert!(registry.get(&slow.id).is_none());
        assert!(slow.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_silent_connections() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _rx) = registry.register(Identity::student("s1"));
        assert_eq!(registry.sweep(Duration::from_secs(60)), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(registry.sweep(Duration::from_secs(60)), 1);
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn mark_alive_keeps_connection() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _rx) = registry.register(Identity::student("s1"));
        tokio::time::advance(Duration::from_secs(50)).await;
        conn.mark_alive();
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(registry.sweep(Duration::from_secs(60)), 0);
    }

    #[test]
    fn close_all_releases_everyone() {
        let registry = ConnectionRegistry::new(8);
        let (a, _ra) = registry.register(Identity::teacher("t1"));
        let (b, _rb) = registry.register(Identity::student("s1"));
        registry.close_all();
        assert_eq!(registry.count(), 0);
        assert!(a.is_closed() && b.is_closed());
    }
}
