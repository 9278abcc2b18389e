//! WebSocket lifecycle for one attached client, from upgrade to disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};

use rollcall_core::{CoordinatorError, Identity};

use crate::coordinator::CoordinatorHandle;
use crate::metrics::{WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL};
use crate::protocol::OutboundEvent;
use crate::registry::ConnectionRegistry;

/// Run an authenticated connection.
///
/// 1. Registers the client, which queues `CONNECTED` as its first message
/// 2. Forwards text frames to the coordinator in arrival order
/// 3. Writes queued outbound messages and pings every `heartbeat`
/// 4. Unregisters on disconnect, eviction or shutdown
#[instrument(skip_all, fields(user_id = %identity.user_id, role = %identity.role))]
pub async fn run_connection(
    socket: WebSocket,
    identity: Identity,
    registry: Arc<ConnectionRegistry>,
    coordinator: CoordinatorHandle,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (connection, mut send_rx) = registry.register(identity.clone());
    let connection_id = connection.id.clone();
    let started = Instant::now();

    info!(connection_id = %connection_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let writer_conn = connection.clone();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => match msg {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_conn.closed() => break,
            }
        }

        // Flush what was queued before the registry let go, e.g. a final ERROR.
        while let Ok(text) = send_rx.try_recv() {
            if ws_tx.send(Message::Text(text.as_str().into())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = connection.closed() => break,
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!(connection_id = %connection_id, len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                connection.mark_alive();
                continue;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                debug!(connection_id = %connection_id, error = %e, "websocket read failed");
                break;
            }
        };

        if !coordinator.submit(connection_id.clone(), identity.clone(), text).await {
            warn!(connection_id = %connection_id, "coordinator unavailable, closing connection");
            break;
        }
    }

    let _ = registry.unregister(&connection_id);
    let _ = writer.await;

    info!(
        connection_id = %connection_id,
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Refuse an upgraded socket whose credential did not verify. The socket
/// never enters the registry.
pub async fn reject(socket: WebSocket, err: CoordinatorError) {
    let (mut ws_tx, _ws_rx) = socket.split();
    if let Ok(json) = serde_json::to_string(&OutboundEvent::error(&err)) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }
    let _ = ws_tx.send(Message::Close(None)).await;
}
