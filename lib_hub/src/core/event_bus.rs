//! # Event Bus
//!
//! In-process publish/subscribe keyed by topic (a feed key). Listeners are
//! identified by the [`ListenerHandle`] returned from [`EventBus::listen`],
//! never by comparing callbacks.
//!
//! `emit` copies the listener list for the topic, releases the table lock and
//! then invokes each callback in registration order. A callback may therefore
//! call back into the bus (typically to deregister itself) without
//! deadlocking. Every listener registered at the moment of the emit receives
//! the event exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Opaque identity of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

/// Callbacks receive their own handle so they can deregister themselves.
type Callback<E> = Arc<dyn Fn(ListenerHandle, &E) + Send + Sync>;

pub struct EventBus<E> {
    topics: Mutex<HashMap<String, Vec<(ListenerHandle, Callback<E>)>>>,
    next_handle: AtomicU64,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` on `topic` and returns its handle.
    pub fn listen<F>(&self, topic: &str, callback: F) -> ListenerHandle
    where
        F: Fn(ListenerHandle, &E) + Send + Sync + 'static,
    {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_string())
            .or_default()
            .push((handle, Arc::new(callback)));
        handle
    }

    /// Deregisters a listener. Returns `false` when the handle was not
    /// registered on `topic` (already removed, or never there).
    pub fn stop_listening(&self, topic: &str, handle: ListenerHandle) -> bool {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(listeners) = topics.get_mut(topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != handle);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    /// Delivers `event` to every listener of `topic`; returns how many ran.
    pub fn emit(&self, topic: &str, event: &E) -> usize {
        let snapshot: Vec<(ListenerHandle, Callback<E>)> = {
            let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
            match topics.get(topic) {
                Some(listeners) => listeners.clone(),
                None => return 0,
            }
        };
        for (handle, callback) in &snapshot {
            callback(*handle, event);
        }
        snapshot.len()
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).map_or(0, Vec::len)
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_emit_runs_listeners_in_registration_order() {
        let bus: EventBus<u32> = EventBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.listen("alice", move |_, value| {
                seen.lock().unwrap().push(format!("{}:{}", tag, value));
            });
        }

        assert_eq!(bus.emit("alice", &7), 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:7", "second:7", "third:7"]
        );
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus: EventBus<&'static str> = EventBus::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        bus.listen("alice", move |_, value| sink.lock().unwrap().push(*value));

        assert_eq!(bus.emit("bob", &"for bob"), 0);
        assert_eq!(bus.emit("alice", &"for alice"), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["for alice"]);
    }

    #[test]
    fn test_stop_listening_by_handle() {
        let bus: EventBus<()> = EventBus::new();
        let a = bus.listen("alice", |_, _| {});
        let b = bus.listen("alice", |_, _| {});
        assert_ne!(a, b);

        assert!(bus.stop_listening("alice", a));
        assert!(!bus.stop_listening("alice", a));
        assert!(!bus.stop_listening("bob", b));
        assert_eq!(bus.listener_count("alice"), 1);

        assert!(bus.stop_listening("alice", b));
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn test_listener_can_deregister_itself_during_emit() {
        let bus: Arc<EventBus<u8>> = Arc::new(EventBus::new());
        let calls = Arc::new(StdMutex::new(0));

        let weak = Arc::downgrade(&bus);
        let counter = calls.clone();
        bus.listen("alice", move |handle, _| {
            *counter.lock().unwrap() += 1;
            if let Some(bus) = weak.upgrade() {
                bus.stop_listening("alice", handle);
            }
        });

        assert_eq!(bus.emit("alice", &1), 1);
        assert_eq!(bus.emit("alice", &2), 0);
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}
