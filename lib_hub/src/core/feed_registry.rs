//! # Feed Registry
//!
//! The subscription index: feed key → set of subscribed connections.
//!
//! An entry whose subscriber set drops to zero is not removed right away. It
//! lingers until the next poll sweep calls [`FeedRegistry::prune`], which
//! batches the cleanup and gives the hub a chance to tell any remaining
//! listener that the feed is closed.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::core::ConnectionId;
use crate::error::{HubError, HubResult};

#[derive(Default)]
pub struct FeedRegistry {
    feeds: Mutex<HashMap<String, HashSet<ConnectionId>>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` as a subscriber of `feed`. Returns `true` when this created
    /// the feed entry.
    pub fn subscribe(&self, feed: &str, id: ConnectionId) -> bool {
        let mut feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
        let created = !feeds.contains_key(feed);
        feeds.entry(feed.to_string()).or_default().insert(id);
        if created {
            log::debug!("Feed '{}' registered", feed);
        }
        created
    }

    /// Removes `id` from `feed`. Returns whether the entry is now empty (and
    /// so due for pruning).
    pub fn unsubscribe(&self, feed: &str, id: ConnectionId) -> HubResult<bool> {
        let mut feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
        let subscribers = feeds.get_mut(feed).ok_or_else(|| HubError::NotSubscribed {
            feed: feed.to_string(),
        })?;
        if !subscribers.remove(&id) {
            return Err(HubError::NotSubscribed {
                feed: feed.to_string(),
            });
        }
        Ok(subscribers.is_empty())
    }

    /// Removes every empty entry.
    ///
    /// The empty keys are collected first; `before_remove` runs for each of
    /// them with the registry unlocked, then the entry is dropped only if it
    /// is still empty. Returns the keys that were actually removed.
    pub fn prune<F>(&self, mut before_remove: F) -> Vec<String>
    where
        F: FnMut(&str),
    {
        let empty: Vec<String> = {
            let feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
            feeds
                .iter()
                .filter(|(_, subscribers)| subscribers.is_empty())
                .map(|(feed, _)| feed.clone())
                .collect()
        };

        let mut removed = Vec::with_capacity(empty.len());
        for feed in empty {
            before_remove(&feed);
            let mut feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
            if feeds.get(&feed).is_some_and(HashSet::is_empty) {
                feeds.remove(&feed);
                log::info!("Feed '{}' pruned", feed);
                removed.push(feed);
            }
        }
        removed
    }

    /// Drops a feed regardless of its subscribers.
    pub fn remove(&self, feed: &str) -> Option<HashSet<ConnectionId>> {
        let mut feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
        feeds.remove(feed)
    }

    pub fn contains(&self, feed: &str) -> bool {
        let feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
        feeds.contains_key(feed)
    }

    /// Snapshot of every registered feed key, sorted.
    pub fn keys(&self) -> Vec<String> {
        let feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
        let mut keys: Vec<String> = feeds.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn subscribers(&self, feed: &str) -> Vec<ConnectionId> {
        let feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
        feeds
            .get(feed)
            .map(|subscribers| subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, feed: &str) -> usize {
        let feeds = self.feeds.lock().unwrap_or_else(PoisonError::into_inner);
        feeds.get(feed).map_or(0, HashSet::len)
    }

    pub fn len(&self) -> usize {
        self.feeds.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
