//! Push channel: broadcasting text frames to every connected WebSocket client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use crate::frame::{self, FrameError};

/// An encoded frame shared between every connection it is sent to.
pub type OutboundFrame = Arc<[u8]>;

/// A text message received from a WebSocket client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub conn_id: Uuid,
    pub text: String,
}

struct ConnectionHandle {
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

/// Registry of live WebSocket connections.
///
/// Cheap to clone; all clones share the same registry. Sending never blocks:
/// each connection's writer task drains its own queue, and a connection whose
/// queue is closed is pruned on the next send.
#[derive(Clone, Default)]
pub struct BroadcastRegistry {
    connections: Arc<Mutex<HashMap<Uuid, ConnectionHandle>>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ConnectionHandle>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn add(
        &self,
        conn_id: Uuid,
        peer: SocketAddr,
        tx: mpsc::UnboundedSender<OutboundFrame>,
    ) {
        self.lock().insert(conn_id, ConnectionHandle { peer, tx });
    }

    pub(crate) fn remove(&self, conn_id: Uuid) -> bool {
        self.lock().remove(&conn_id).is_some()
    }

    /// Drop every connection's sender, which ends their writer tasks.
    pub(crate) fn close_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        for (conn_id, handle) in &drained {
            debug!(conn_id = %conn_id, peer = %handle.peer, "Closing connection");
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Send `text` to every connected client. Returns how many accepted it.
    ///
    /// The frame is encoded once. Safe to call from any thread, including the
    /// host tick.
    pub fn broadcast(&self, text: &str) -> Result<usize, FrameError> {
        let frame: OutboundFrame = frame::encode_text(text)?.into();
        let mut connections = self.lock();

        let mut dead = Vec::new();
        for (conn_id, handle) in connections.iter() {
            if handle.tx.send(Arc::clone(&frame)).is_err() {
                dead.push(*conn_id);
            }
        }
        for conn_id in &dead {
            connections.remove(conn_id);
            debug!(conn_id = %conn_id, "Pruned closed connection");
        }

        let sent = connections.len();
        debug!(sent, pruned = dead.len(), bytes = frame.len(), "Broadcast");
        Ok(sent)
    }

    /// Broadcast a typed JSON event: `{"type": event, "data": ..., "timestamp": ...}`.
    pub fn broadcast_event(&self, event: &str, data: Value) -> Result<usize, FrameError> {
        let message = json!({
            "type": event,
            "data": data,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        match serde_json::to_string(&message) {
            Ok(text) => self.broadcast(&text),
            Err(e) => {
                error!(%e, "Failed to serialize event");
                Ok(0)
            }
        }
    }

    /// Send `text` to a single connection.
    pub fn send_to(&self, conn_id: Uuid, text: &str) -> Result<bool, FrameError> {
        let frame: OutboundFrame = frame::encode_text(text)?.into();
        let mut connections = self.lock();
        let Some(handle) = connections.get(&conn_id) else {
            return Ok(false);
        };
        if handle.tx.send(frame).is_err() {
            connections.remove(&conn_id);
            return Ok(false);
        }
        Ok(true)
    }
}

/// Greeting sent to each client right after the handshake.
pub fn welcome_message() -> String {
    json!({
        "type": "connection",
        "status": "connected",
        "message": "Welcome to Hostlink!",
        "server_version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:5000".parse().unwrap()
    }

    #[test]
    fn test_broadcast_reaches_all_and_prunes_dead() {
        let registry = BroadcastRegistry::new();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let a = Uuid::new_v4();
        registry.add(a, peer(), tx_a);
        registry.add(Uuid::new_v4(), peer(), tx_b);
        drop(rx_b);

        assert_eq!(registry.broadcast("x").unwrap(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(&*rx_a.try_recv().unwrap(), &[0x81, 0x01, b'x']);

        assert!(registry.send_to(a, "only you").unwrap());
        assert!(!registry.send_to(Uuid::new_v4(), "nobody").unwrap());
    }

    #[test]
    fn test_broadcast_with_no_clients() {
        let registry = BroadcastRegistry::new();
        assert_eq!(registry.broadcast("hello").unwrap(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_oversized_broadcast_is_an_error() {
        let registry = BroadcastRegistry::new();
        let big = "x".repeat(frame::MAX_PAYLOAD + 1);
        assert!(matches!(
            registry.broadcast(&big),
            Err(FrameError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn test_close_all_drops_senders() {
        let registry = BroadcastRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.add(Uuid::new_v4(), peer(), tx);
        assert_eq!(registry.close_all(), 1);
        assert!(registry.is_empty());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_welcome_message_shape() {
        let value: Value = serde_json::from_str(&welcome_message()).unwrap();
        assert_eq!(value["type"], "connection");
        assert_eq!(value["status"], "connected");
        assert!(value["timestamp"].is_string());
    }
}
