//! # Poll Scheduler
//!
//! Periodically refreshes every feed that has subscribers.
//!
//! ## Sweep
//! 1. Prune feeds without subscribers (closed event, cache eviction).
//! 2. Fetch a snapshot for every remaining feed. Fetches for different feeds
//!    run concurrently; a feed whose previous fetch has not finished yet is
//!    skipped, so results for one feed are never applied out of order.
//! 3. Apply each result:
//!    - snapshot → change detector, emitted only when it differs;
//!    - domain error → feed and cache removed, error event emitted;
//!    - no data → error reported, feed kept for the next sweep;
//!    - transient failure → logged, nothing emitted, feed kept.
//!
//! Results for feeds that disappeared while the fetch was in flight are
//! dropped by the hub's stale-write check.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::core::Hub;
use crate::protocol::Track;
use crate::provider::{FeedProvider, ProviderError};

/// What happened to one feed during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Updated,
    Unchanged,
    /// Domain error: the feed was removed.
    Removed,
    NoData,
    Transient,
    /// The feed vanished before the result arrived.
    Stale,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub pruned: Vec<String>,
    pub outcomes: Vec<(String, FetchOutcome)>,
    /// Feeds whose previous fetch was still running.
    pub skipped: Vec<String>,
}

impl SweepReport {
    pub fn outcome(&self, feed: &str) -> Option<FetchOutcome> {
        self.outcomes
            .iter()
            .find(|(key, _)| key == feed)
            .map(|(_, outcome)| *outcome)
    }
}

pub struct PollScheduler {
    hub: Arc<Hub>,
    provider: Arc<dyn FeedProvider>,
    in_flight: Mutex<HashSet<String>>,
}

/// Marks a feed as being fetched until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    feed: String,
}

impl<'a> InFlight<'a> {
    fn claim(set: &'a Mutex<HashSet<String>>, feed: &str) -> Option<Self> {
        let mut guard = set.lock().unwrap_or_else(PoisonError::into_inner);
        if !guard.insert(feed.to_string()) {
            return None;
        }
        Some(Self {
            set,
            feed: feed.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.feed);
    }
}

impl PollScheduler {
    pub fn new(hub: Arc<Hub>, provider: Arc<dyn FeedProvider>) -> Self {
        Self {
            hub,
            provider,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Number of fetches currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Runs one sweep to completion.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport {
            pruned: self.hub.prune(),
            ..Default::default()
        };

        let mut fetches = Vec::new();
        for feed in self.hub.feeds().keys() {
            let Some(claim) = InFlight::claim(&self.in_flight, &feed) else {
                log::debug!("Fetch for '{}' still running, skipping", feed);
                report.skipped.push(feed);
                continue;
            };
            fetches.push(async move {
                let result = self.provider.fetch_snapshot(&feed).await;
                let outcome = self.apply(&feed, result);
                drop(claim);
                (feed, outcome)
            });
        }
        report.outcomes = join_all(fetches).await;

        log::debug!(
            "Sweep done: {} fetched, {} pruned, {} skipped",
            report.outcomes.len(),
            report.pruned.len(),
            report.skipped.len()
        );
        report
    }

    /// Applies one provider result to the hub.
    pub fn apply(&self, feed: &str, result: Result<Track, ProviderError>) -> FetchOutcome {
        match result {
            Ok(track) => match self.hub.apply_snapshot(feed, track) {
                Some(true) => FetchOutcome::Updated,
                Some(false) => FetchOutcome::Unchanged,
                None => FetchOutcome::Stale,
            },
            Err(ProviderError::Domain(message)) => {
                if self.hub.fail_feed(feed, &message) {
                    FetchOutcome::Removed
                } else {
                    FetchOutcome::Stale
                }
            }
            Err(ProviderError::NoData(message)) => {
                if self.hub.report_no_data(feed, &message) {
                    FetchOutcome::NoData
                } else {
                    FetchOutcome::Stale
                }
            }
            Err(ProviderError::Transient(message)) => {
                log::warn!("Fetch for '{}' failed, retrying next sweep: {}", feed, message);
                FetchOutcome::Transient
            }
        }
    }

    /// Sweeps every `poll_interval` until `shutdown` resolves. Each sweep runs
    /// in its own task so a slow provider never delays the next tick.
    pub async fn run<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let period = self.hub.settings().poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        log::info!("Poll scheduler started, interval {:?}", period);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Poll scheduler received shutdown signal.");
                    break;
                }
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&self);
                    tokio::spawn(async move {
                        scheduler.sweep().await;
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HubSettings;
    use crate::provider::memory::MemoryProvider;
    use crate::transport::ChannelTransport;
    use std::time::Duration;

    fn setup() -> (Arc<PollScheduler>, Arc<MemoryProvider>) {
        let transport = Arc::new(ChannelTransport::new());
        let hub = Hub::new(HubSettings::default(), transport);
        let provider = Arc::new(MemoryProvider::new());
        let scheduler = Arc::new(PollScheduler::new(hub, provider.clone()));
        (scheduler, provider)
    }

    fn track(name: &str) -> Track {
        Track {
            name: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sweep_fetches_only_subscribed_feeds() {
        let (scheduler, provider) = setup();
        let hub = scheduler.hub().clone();
        let id = hub.connections().create();
        hub.subscribe(id, "alice").unwrap();
        provider.set("alice", Ok(track("Song A")));
        provider.set("bob", Ok(track("Song B")));

        let report = scheduler.sweep().await;
        assert_eq!(report.outcomes, vec![("alice".to_string(), FetchOutcome::Updated)]);
        assert_eq!(provider.calls("alice"), 1);
        assert_eq!(provider.calls("bob"), 0);

        let report = scheduler.sweep().await;
        assert_eq!(report.outcome("alice"), Some(FetchOutcome::Unchanged));
    }

    #[tokio::test]
    async fn test_sweep_prunes_before_fetching() {
        let (scheduler, provider) = setup();
        let hub = scheduler.hub().clone();
        let id = hub.connections().create();
        hub.subscribe(id, "alice").unwrap();
        hub.unsubscribe(id, "alice").unwrap();

        let report = scheduler.sweep().await;
        assert_eq!(report.pruned, vec!["alice".to_string()]);
        assert!(report.outcomes.is_empty());
        assert_eq!(provider.calls("alice"), 0);
    }

    #[tokio::test]
    async fn test_outcomes_for_provider_errors() {
        let (scheduler, _) = setup();
        let hub = scheduler.hub().clone();
        let id = hub.connections().create();
        hub.subscribe(id, "alice").unwrap();
        hub.subscribe(id, "bob").unwrap();

        assert_eq!(
            scheduler.apply("alice", Err(ProviderError::Transient("timeout".into()))),
            FetchOutcome::Transient
        );
        assert_eq!(
            scheduler.apply("alice", Err(ProviderError::NoData("empty".into()))),
            FetchOutcome::NoData
        );
        assert!(hub.feeds().contains("alice"));

        assert_eq!(
            scheduler.apply("bob", Err(ProviderError::Domain("User not found".into()))),
            FetchOutcome::Removed
        );
        assert_eq!(
            scheduler.apply("bob", Err(ProviderError::Domain("User not found".into()))),
            FetchOutcome::Stale
        );
        assert_eq!(scheduler.apply("bob", Ok(track("late"))), FetchOutcome::Stale);
        assert!(hub.cache().get("bob").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_is_not_overlapped() {
        let (scheduler, provider) = setup();
        let hub = scheduler.hub().clone();
        let id = hub.connections().create();
        hub.subscribe(id, "alice").unwrap();
        provider.set("alice", Ok(track("Song A")));
        provider.set_delay(Duration::from_secs(20));

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.sweep().await }
        });
        while scheduler.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        let second = scheduler.sweep().await;
        assert_eq!(second.skipped, vec!["alice".to_string()]);
        assert!(second.outcomes.is_empty());

        let first = first.await.unwrap();
        assert_eq!(first.outcome("alice"), Some(FetchOutcome::Updated));
        assert_eq!(scheduler.in_flight(), 0);
        assert_eq!(provider.calls("alice"), 1);
    }
}
