//! # Transport Seam
//!
//! The hub never touches sockets. It hands finished text frames and close
//! requests to a [`Transport`], keyed by connection id.
//!
//! [`ChannelTransport`] is the implementation used by the WebSocket server:
//! every connection owns an unbounded MPSC queue, and the socket task drains
//! it in order. Tests drain the same queue to observe what a client would
//! receive.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::core::ConnectionId;

/// Close code sent with every hub-initiated termination.
pub const CLOSE_CODE_INTERNAL: u16 = 1011;

/// Outbound side of the connection layer.
pub trait Transport: Send + Sync {
    /// Queues a text frame for the connection. Unknown connections are ignored.
    fn send(&self, id: ConnectionId, text: String);

    /// Closes the connection with a close code and reason.
    fn terminate(&self, id: ConnectionId, code: u16, reason: &str);
}

/// An item queued for a single connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// Transport backed by one MPSC queue per connection.
#[derive(Default)]
pub struct ChannelTransport {
    peers: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns the receiving half of its queue.
    /// Attaching an id twice replaces the previous queue.
    pub fn attach(&self, id: ConnectionId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        peers.insert(id, tx);
        rx
    }

    pub fn detach(&self, id: ConnectionId) -> bool {
        let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        peers.remove(&id).is_some()
    }

    pub fn is_attached(&self, id: ConnectionId) -> bool {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Transport for ChannelTransport {
    fn send(&self, id: ConnectionId, text: String) {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        match peers.get(&id) {
            Some(tx) => {
                if tx.send(Outbound::Text(text)).is_err() {
                    log::debug!("Connection {} queue is closed, dropping frame", id);
                }
            }
            None => log::trace!("Connection {} is not attached, dropping frame", id),
        }
    }

    fn terminate(&self, id: ConnectionId, code: u16, reason: &str) {
        // The sender is dropped here, so the queue ends right after the close item.
        let tx = {
            let mut peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
            peers.remove(&id)
        };
        if let Some(tx) = tx {
            let _ = tx.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_arrive_in_order_and_close_ends_queue() {
        let transport = ChannelTransport::new();
        let id = ConnectionId::new();
        let mut rx = transport.attach(id);

        transport.send(id, "one".into());
        transport.send(id, "two".into());
        transport.terminate(id, CLOSE_CODE_INTERNAL, "done");
        transport.send(id, "late".into());

        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("one".into()));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("two".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: CLOSE_CODE_INTERNAL,
                reason: "done".into()
            }
        );
        assert!(rx.try_recv().is_err());
        assert!(!transport.is_attached(id));
    }

    #[test]
    fn test_send_to_unknown_connection_is_ignored() {
        let transport = ChannelTransport::new();
        transport.send(ConnectionId::new(), "nobody".into());
        transport.terminate(ConnectionId::new(), CLOSE_CODE_INTERNAL, "nobody");
        assert!(transport.is_empty());
    }
}
