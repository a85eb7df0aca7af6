//! # Hub
//!
//! Owns the shared state of a running hub: the connection registry, the feed
//! index, the change-detection cache, the event bus and the heartbeat
//! monitor. It is built once at startup, shared behind an `Arc`, and torn
//! down with [`Hub::shutdown`].
//!
//! ## Locking
//!
//! Each structure has its own lock. On top of that, `membership` serialises
//! the composite sequences that touch several structures at once (subscribe
//! and listen, unsubscribe and stop listening, connection removal, prune,
//! the stale check before a cache update, forced feed removal). Events are
//! emitted after `membership` is released, so listeners may call back into
//! the hub. The one exception is the `Closed` event fired during prune; its
//! listener path never takes `membership`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::core::{
    ChangeDetector, ConnectionId, ConnectionRegistry, EventBus, FeedRegistry, HeartbeatMonitor,
    ListenerHandle,
};
use crate::error::{HubError, HubResult};
use crate::protocol::{ServerMessage, Track};
use crate::transport::{Transport, CLOSE_CODE_INTERNAL};

pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Timing knobs of the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubSettings {
    /// Advertised to clients in the ready frame.
    pub ping_interval: Duration,
    /// Added to `ping_interval` before a missing heartbeat is fatal.
    pub ping_grace: Duration,
    pub poll_interval: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(30_000),
            ping_grace: Duration::from_millis(5_000),
            poll_interval: Duration::from_millis(15_000),
        }
    }
}

impl HubSettings {
    pub fn heartbeat_period(&self) -> Duration {
        self.ping_interval + self.ping_grace
    }
}

/// What the bus carries for a feed key.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A snapshot that differs from the last one emitted.
    Update(Arc<Track>),
    /// Terminal provider error. The feed has already been removed.
    Error(String),
    /// The provider had nothing to report this sweep. The feed entry stays
    /// until prune; listeners unsubscribe as for `Error`.
    NoData(String),
    /// The feed was pruned.
    Closed,
}

pub struct Hub {
    settings: HubSettings,
    connections: ConnectionRegistry,
    feeds: FeedRegistry,
    cache: ChangeDetector<Track>,
    bus: EventBus<FeedEvent>,
    heartbeat: HeartbeatMonitor,
    transport: Arc<dyn Transport>,
    membership: Mutex<()>,
}

impl Hub {
    pub fn new(settings: HubSettings, transport: Arc<dyn Transport>) -> Arc<Self> {
        let heartbeat = HeartbeatMonitor::new(settings.heartbeat_period());
        Arc::new(Self {
            settings,
            connections: ConnectionRegistry::new(),
            feeds: FeedRegistry::new(),
            cache: ChangeDetector::new(),
            bus: EventBus::new(),
            heartbeat,
            transport,
            membership: Mutex::new(()),
        })
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn feeds(&self) -> &FeedRegistry {
        &self.feeds
    }

    pub fn cache(&self) -> &ChangeDetector<Track> {
        &self.cache
    }

    pub fn bus(&self) -> &EventBus<FeedEvent> {
        &self.bus
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    /// Encodes and queues a message for one connection.
    pub fn send(&self, id: ConnectionId, message: &ServerMessage) {
        match message.encode() {
            Ok(text) => self.transport.send(id, text),
            Err(e) => log::error!("Dropping message for {}: {}", id, e),
        }
    }

    /// Terminates a connection: close frame with `reason`, then a transport
    /// close with code 1011. Runs once per connection; later calls are no-ops.
    pub fn close(&self, id: ConnectionId, reason: &str) {
        if !self.connections.mark_closed(id) {
            return;
        }
        self.heartbeat.stop(id);
        self.send(id, &ServerMessage::close(reason));
        self.transport.terminate(id, CLOSE_CODE_INTERNAL, reason);
        log::info!("Connection {} closed: {}", id, reason);
    }

    /// Subscribes `id` to `feed` and registers the listener that delivers the
    /// feed to it. Subscribing twice is a no-op. Returns the connection's
    /// subscription list.
    pub fn subscribe(self: &Arc<Self>, id: ConnectionId, feed: &str) -> HubResult<Vec<String>> {
        let _membership = self.lock_membership();
        if !self.connections.contains(id) {
            return Err(HubError::UnknownConnection(id));
        }
        if self.connections.is_subscribed(id, feed) {
            return Ok(self.connections.subscriptions(id));
        }

        let weak = Arc::downgrade(self);
        let key = feed.to_string();
        let handle = self.bus.listen(feed, move |handle, event| {
            if let Some(hub) = weak.upgrade() {
                hub.deliver(id, &key, handle, event);
            }
        });
        self.connections.add_subscription(id, feed, handle)?;
        self.feeds.subscribe(feed, id);
        log::debug!("Connection {} subscribed to '{}'", id, feed);

        Ok(self.connections.subscriptions(id))
    }

    /// Removes the subscription and its listener. Fails with
    /// [`HubError::NotSubscribed`] if the connection does not hold it.
    pub fn unsubscribe(&self, id: ConnectionId, feed: &str) -> HubResult<Vec<String>> {
        let _membership = self.lock_membership();
        self.detach(id, feed)
    }

    /// Like [`Hub::unsubscribe`], but only while `handle` is still the
    /// listener registered for the subscription. `None` means a newer
    /// subscription replaced it, or it is already gone.
    fn unsubscribe_listener(
        &self,
        id: ConnectionId,
        feed: &str,
        handle: ListenerHandle,
    ) -> Option<Vec<String>> {
        let _membership = self.lock_membership();
        if self.connections.listener_handle(id, feed) != Some(handle) {
            return None;
        }
        self.detach(id, feed).ok()
    }

    /// Caller holds `membership`.
    fn detach(&self, id: ConnectionId, feed: &str) -> HubResult<Vec<String>> {
        let handle = self.connections.remove_subscription(id, feed)?;
        self.bus.stop_listening(feed, handle);
        // The feed may already be gone after a provider error.
        if self.feeds.unsubscribe(feed, id).is_err() {
            log::trace!("Feed '{}' was already removed", feed);
        }
        log::debug!("Connection {} unsubscribed from '{}'", id, feed);

        Ok(self.connections.subscriptions(id))
    }

    /// Forgets a connection and detaches all of its subscriptions. Returns
    /// `false` if the connection was unknown.
    pub fn remove_connection(&self, id: ConnectionId) -> bool {
        let _membership = self.lock_membership();
        self.heartbeat.stop(id);
        let Some(held) = self.connections.remove(id) else {
            return false;
        };
        for (feed, handle) in &held {
            self.bus.stop_listening(feed, *handle);
            let _ = self.feeds.unsubscribe(feed, id);
        }
        log::info!(
            "Connection {} removed ({} subscriptions released)",
            id,
            held.len()
        );
        true
    }

    /// Drops every feed without subscribers, telling leftover listeners the
    /// feed is closed and evicting the cached snapshot.
    pub fn prune(&self) -> Vec<String> {
        let _membership = self.lock_membership();
        let removed = self.feeds.prune(|feed| {
            self.bus.emit(feed, &FeedEvent::Closed);
        });
        for feed in &removed {
            self.cache.evict(feed);
        }
        removed
    }

    /// Feeds a fetched snapshot through the change detector and emits it when
    /// it changed.
    ///
    /// Returns `None` when the feed is no longer registered (a late result
    /// for a pruned feed); the cache is left untouched in that case.
    pub fn apply_snapshot(&self, feed: &str, track: Track) -> Option<bool> {
        let changed = {
            let _membership = self.lock_membership();
            if !self.feeds.contains(feed) {
                return None;
            }
            self.cache.observe(feed, track.clone())
        };
        if changed {
            self.bus.emit(feed, &FeedEvent::Update(Arc::new(track)));
        }
        Some(changed)
    }

    /// Removes a feed together with its cache entry, then reports `message`
    /// to its listeners. Returns `false` if the feed was already gone.
    pub fn fail_feed(&self, feed: &str, message: &str) -> bool {
        {
            let _membership = self.lock_membership();
            if self.feeds.remove(feed).is_none() {
                return false;
            }
            self.cache.evict(feed);
        }
        log::info!("Feed '{}' removed: {}", feed, message);
        self.bus.emit(feed, &FeedEvent::Error(message.to_string()));
        true
    }

    /// Reports an empty provider result. The feed entry and its cache are
    /// left alone; listeners drop their subscriptions and an unsubscribed
    /// feed is pruned on the next sweep.
    pub fn report_no_data(&self, feed: &str, message: &str) -> bool {
        if !self.feeds.contains(feed) {
            return false;
        }
        self.bus.emit(feed, &FeedEvent::NoData(message.to_string()));
        true
    }

    /// Closes every connection and cancels all heartbeat timers.
    pub fn shutdown(&self) {
        let ids = self.connections.ids();
        log::info!("Hub shutting down, closing {} connections", ids.len());
        for id in ids {
            self.close(id, SHUTDOWN_REASON);
        }
        self.heartbeat.stop_all();
    }

    /// The per-(connection, feed) listener.
    fn deliver(&self, id: ConnectionId, feed: &str, handle: ListenerHandle, event: &FeedEvent) {
        match event {
            FeedEvent::Update(track) => {
                self.send(id, &ServerMessage::track(feed, track.as_ref().clone()));
            }
            FeedEvent::Error(message) | FeedEvent::NoData(message) => {
                self.send(id, &ServerMessage::feed_error(feed, message));
                match self.unsubscribe_listener(id, feed, handle) {
                    Some(subscriptions) => {
                        self.send(id, &ServerMessage::subscribe_ack(subscriptions));
                    }
                    None => {
                        self.bus.stop_listening(feed, handle);
                    }
                }
            }
            FeedEvent::Closed => {
                self.bus.stop_listening(feed, handle);
                self.connections.remove_subscription_if(id, feed, handle);
            }
        }
    }

    fn lock_membership(&self) -> std::sync::MutexGuard<'_, ()> {
        self.membership.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
