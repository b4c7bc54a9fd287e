use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Bytes;
use axum::extract::ws::Message;
use relay_core::events::ClientEvent;
use relay_core::types::Timestamp;
use tokio::sync::{mpsc, RwLock};

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Identifies one registration of a client id. A later registration for the
/// same id gets a new token.
pub type RegistrationToken = u64;

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    /// Channel sender for outbound messages to this connection.
    pub sender: WsSender,
    pub token: RegistrationToken,
    /// When this connection was established.
    pub connected_at: Timestamp,
}

/// Browser push connections keyed by client notification id.
///
/// At most one connection per client id: registering again retires the
/// previous connection. Delivery is best effort; nothing is queued for
/// clients that are not connected.
pub struct WsManager {
    connections: RwLock<HashMap<String, WsConnection>>,
    next_token: AtomicU64,
}

impl WsManager {
    /// Create a new, empty connection manager.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Register a connection for `client_id`, replacing any previous one.
    ///
    /// The replaced connection is sent a Close frame. Returns the token to
    /// pass to [`unregister`](Self::unregister) and the receiver half of the
    /// message channel.
    pub async fn register(
        &self,
        client_id: &str,
    ) -> (RegistrationToken, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let conn = WsConnection {
            sender: tx,
            token,
            connected_at: chrono::Utc::now(),
        };

        let previous = self
            .connections
            .write()
            .await
            .insert(client_id.to_string(), conn);
        if let Some(previous) = previous {
            tracing::info!(client_id = %client_id, "Replacing existing client connection");
            let _ = previous.sender.send(Message::Close(None));
        }
        (token, rx)
    }

    /// Remove the connection for `client_id` if it is still the one
    /// registered with `token`.
    pub async fn unregister(&self, client_id: &str, token: RegistrationToken) -> bool {
        let mut conns = self.connections.write().await;
        match conns.get(client_id) {
            Some(conn) if conn.token == token => {
                conns.remove(client_id);
                true
            }
            _ => false,
        }
    }

    /// Deliver an event to the client, if connected.
    ///
    /// Returns whether the event was handed to an open connection. A missing
    /// or closed connection is not an error.
    pub async fn send(&self, client_id: &str, event: &ClientEvent) -> bool {
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(client_id = %client_id, error = %e, "Failed to encode client event");
                return false;
            }
        };

        let delivered = self.send_message(client_id, Message::Text(payload.into())).await;
        if !delivered {
            tracing::debug!(
                client_id = %client_id,
                event = event.kind(),
                "No open client connection, event dropped",
            );
        }
        delivered
    }

    /// Send a raw frame to one client.
    pub async fn send_message(&self, client_id: &str, message: Message) -> bool {
        let conns = self.connections.read().await;
        match conns.get(client_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    pub async fn is_connected(&self, client_id: &str) -> bool {
        self.connections.read().await.contains_key(client_id)
    }

    /// Return the current number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    ///
    /// Used during graceful shutdown to notify all clients before the
    /// server stops.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    ///
    /// Used by the heartbeat task to keep connections alive and detect
    /// stale ones.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}
