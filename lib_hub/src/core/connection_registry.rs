//! # Connection Registry
//!
//! Owns every live connection for its whole lifetime: its lifecycle state,
//! its liveness flag and the feeds it is subscribed to. Each subscription is
//! stored together with the [`ListenerHandle`] of the event-bus listener that
//! delivers that feed to the connection, so unsubscribing never needs to
//! compare callbacks.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::core::event_bus::ListenerHandle;
use crate::error::{HubError, HubResult};

/// Opaque, unique id of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Lifecycle of a connection as seen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted by the transport; the ready frame has not been sent yet.
    Connecting,
    Open,
    /// Termination was requested; remaining input is ignored.
    Closed,
}

struct ConnectionEntry {
    state: ConnectionState,
    alive: bool,
    subscriptions: IndexMap<String, ListenerHandle>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh connection: no subscriptions, liveness unconfirmed,
    /// state `Connecting`.
    pub fn create(&self) -> ConnectionId {
        let id = ConnectionId::new();
        let mut connections = self.lock();
        connections.insert(
            id,
            ConnectionEntry {
                state: ConnectionState::Connecting,
                alive: false,
                subscriptions: IndexMap::new(),
            },
        );
        id
    }

    /// Moves a `Connecting` connection to `Open`. Returns `false` for any
    /// other state.
    pub fn open(&self, id: ConnectionId) -> bool {
        let mut connections = self.lock();
        match connections.get_mut(&id) {
            Some(entry) if entry.state == ConnectionState::Connecting => {
                entry.state = ConnectionState::Open;
                true
            }
            _ => false,
        }
    }

    /// Marks the connection `Closed`. Returns `true` only on the first call,
    /// so termination runs once.
    pub fn mark_closed(&self, id: ConnectionId) -> bool {
        let mut connections = self.lock();
        match connections.get_mut(&id) {
            Some(entry) if entry.state != ConnectionState::Closed => {
                entry.state = ConnectionState::Closed;
                true
            }
            _ => false,
        }
    }

    pub fn state(&self, id: ConnectionId) -> Option<ConnectionState> {
        self.lock().get(&id).map(|entry| entry.state)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn mark_alive(&self, id: ConnectionId) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.alive = true;
        }
    }

    pub fn is_alive(&self, id: ConnectionId) -> bool {
        self.lock().get(&id).is_some_and(|entry| entry.alive)
    }

    /// Reads and clears the liveness flag in one step, opening a new check
    /// window. `None` if the connection is gone.
    pub fn take_alive(&self, id: ConnectionId) -> Option<bool> {
        self.lock()
            .get_mut(&id)
            .map(|entry| std::mem::replace(&mut entry.alive, false))
    }

    /// The connection's feed keys, in subscription order.
    pub fn subscriptions(&self, id: ConnectionId) -> Vec<String> {
        self.lock()
            .get(&id)
            .map(|entry| entry.subscriptions.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscription_count(&self, id: ConnectionId) -> usize {
        self.lock()
            .get(&id)
            .map_or(0, |entry| entry.subscriptions.len())
    }

    pub fn is_subscribed(&self, id: ConnectionId, feed: &str) -> bool {
        self.lock()
            .get(&id)
            .is_some_and(|entry| entry.subscriptions.contains_key(feed))
    }

    pub fn listener_handle(&self, id: ConnectionId, feed: &str) -> Option<ListenerHandle> {
        self.lock()
            .get(&id)
            .and_then(|entry| entry.subscriptions.get(feed).copied())
    }

    /// Records a subscription. Returns `false` if the feed was already there
    /// (the existing handle is kept).
    pub fn add_subscription(
        &self,
        id: ConnectionId,
        feed: &str,
        handle: ListenerHandle,
    ) -> HubResult<bool> {
        let mut connections = self.lock();
        let entry = connections
            .get_mut(&id)
            .ok_or(HubError::UnknownConnection(id))?;
        if entry.subscriptions.contains_key(feed) {
            return Ok(false);
        }
        entry.subscriptions.insert(feed.to_string(), handle);
        Ok(true)
    }

    /// Drops a subscription and hands back its listener handle.
    pub fn remove_subscription(&self, id: ConnectionId, feed: &str) -> HubResult<ListenerHandle> {
        let mut connections = self.lock();
        let entry = connections
            .get_mut(&id)
            .ok_or(HubError::UnknownConnection(id))?;
        entry
            .subscriptions
            .swap_remove(feed)
            .ok_or_else(|| HubError::NotSubscribed {
                feed: feed.to_string(),
            })
    }

    /// Drops a subscription only if it is still bound to `handle`.
    pub fn remove_subscription_if(
        &self,
        id: ConnectionId,
        feed: &str,
        handle: ListenerHandle,
    ) -> bool {
        let mut connections = self.lock();
        match connections.get_mut(&id) {
            Some(entry) if entry.subscriptions.get(feed) == Some(&handle) => {
                entry.subscriptions.swap_remove(feed);
                true
            }
            _ => false,
        }
    }

    /// Deletes the connection and returns the subscriptions it still held,
    /// so the caller can detach them from the feed index and the bus.
    pub fn remove(&self, id: ConnectionId) -> Option<Vec<(String, ListenerHandle)>> {
        self.lock()
            .remove(&id)
            .map(|entry| entry.subscriptions.into_iter().collect())
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, ConnectionEntry>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
