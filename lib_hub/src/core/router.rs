//! # Message Router
//!
//! Entry point for the transport's callbacks. It walks each connection
//! through `Connecting → Open → Closed`, validates inbound frames and
//! dispatches them through a static opcode table.
//!
//! Every validation failure is fatal: the connection receives
//! `{op:-1, d:{reason}}` and is terminated.

use std::sync::Arc;

use crate::core::{ConnectionId, ConnectionState, Hub};
use crate::error::{HubError, HubResult};
use crate::protocol::{opcode, ClientFrame, ServerMessage};

pub const NOT_READY_REASON: &str = "Please wait for opcode 0 before sending events";
pub const BINARY_REASON: &str = "Message must be a string";

/// A raw frame as delivered by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incoming<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

type Handler = fn(&MessageRouter, ConnectionId, &ClientFrame) -> HubResult<()>;

/// One row of the opcode table.
pub struct OpcodeSpec {
    pub op: i64,
    pub name: &'static str,
    /// Close reason when `d.user` is missing; `None` if the opcode needs no user.
    pub requires_user: Option<&'static str>,
    handler: Handler,
}

pub static OPCODES: &[OpcodeSpec] = &[
    OpcodeSpec {
        op: opcode::HEARTBEAT,
        name: "heartbeat",
        requires_user: None,
        handler: MessageRouter::handle_heartbeat,
    },
    OpcodeSpec {
        op: opcode::SUBSCRIBE,
        name: "subscribe",
        requires_user: Some("Please provide a user when subscribing"),
        handler: MessageRouter::handle_subscribe,
    },
    OpcodeSpec {
        op: opcode::UNSUBSCRIBE,
        name: "unsubscribe",
        requires_user: Some("Please provide a user when unsubscribing"),
        handler: MessageRouter::handle_unsubscribe,
    },
];

pub fn lookup(op: i64) -> Option<&'static OpcodeSpec> {
    OPCODES.iter().find(|spec| spec.op == op)
}

#[derive(Clone)]
pub struct MessageRouter {
    hub: Arc<Hub>,
}

impl MessageRouter {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Registers a freshly accepted connection in the `Connecting` state.
    pub fn accept(&self) -> ConnectionId {
        let id = self.hub.connections().create();
        log::info!("Connection {} accepted", id);
        id
    }

    /// Completes the handshake: sends the ready frame and starts the
    /// heartbeat timer.
    pub fn open(&self, id: ConnectionId) {
        if !self.hub.connections().open(id) {
            log::debug!("Connection {} cannot be opened", id);
            return;
        }
        self.hub
            .send(id, &ServerMessage::ready(self.hub.settings().ping_interval));
        self.hub.heartbeat().start(&self.hub, id);
        log::info!("Connection {} open", id);
    }

    pub fn on_message(&self, id: ConnectionId, message: Incoming<'_>) {
        match self.hub.connections().state(id) {
            Some(ConnectionState::Open) => {}
            Some(ConnectionState::Connecting) => {
                self.hub.close(id, NOT_READY_REASON);
                return;
            }
            Some(ConnectionState::Closed) | None => {
                log::trace!("Dropping message for closed connection {}", id);
                return;
            }
        }

        if let Err(e) = self.dispatch(id, message) {
            self.hub.close(id, &e.to_string());
        }
    }

    /// The transport reported the connection gone.
    pub fn on_close(&self, id: ConnectionId) {
        if self.hub.remove_connection(id) {
            log::info!("Connection {} disconnected", id);
        }
    }

    fn dispatch(&self, id: ConnectionId, message: Incoming<'_>) -> HubResult<()> {
        let text = match message {
            Incoming::Text(text) => text,
            Incoming::Binary(_) => return Err(HubError::protocol(BINARY_REASON)),
        };
        let frame = ClientFrame::parse(text)?;
        let spec = lookup(frame.op)
            .ok_or_else(|| HubError::protocol(format!("Unknown op code {}", frame.op)))?;
        if let Some(reason) = spec.requires_user {
            if frame.user().is_none() {
                return Err(HubError::protocol(reason));
            }
        }
        log::trace!("Connection {} sent {}", id, spec.name);
        (spec.handler)(self, id, &frame)
    }

    fn handle_heartbeat(&self, id: ConnectionId, _frame: &ClientFrame) -> HubResult<()> {
        self.hub.connections().mark_alive(id);
        Ok(())
    }

    fn handle_subscribe(&self, id: ConnectionId, frame: &ClientFrame) -> HubResult<()> {
        let user = frame.user().unwrap_or_default();
        let subscriptions = self.hub.subscribe(id, user)?;
        self.hub.send(id, &ServerMessage::subscribe_ack(subscriptions));
        Ok(())
    }

    fn handle_unsubscribe(&self, id: ConnectionId, frame: &ClientFrame) -> HubResult<()> {
        let user = frame.user().unwrap_or_default();
        let subscriptions = self.hub.unsubscribe(id, user)?;
        self.hub
            .send(id, &ServerMessage::unsubscribe_ack(subscriptions));
        Ok(())
    }
}
