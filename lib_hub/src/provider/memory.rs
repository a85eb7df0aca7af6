//! In-memory provider with scripted answers, for tests and local runs
//! without network access.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::protocol::Track;
use crate::provider::{FeedProvider, ProviderError};

pub const UNKNOWN_FEED_MESSAGE: &str = "User not found";

type Answer = Result<Track, ProviderError>;

#[derive(Default)]
struct Script {
    /// One-shot answers, consumed before `standing`.
    queued: HashMap<String, VecDeque<Answer>>,
    standing: HashMap<String, Answer>,
    calls: HashMap<String, usize>,
    delay: Option<Duration>,
}

/// Answers each key with its queued answers first, then with its standing
/// answer. Keys with neither get a domain error.
#[derive(Default)]
pub struct MemoryProvider {
    script: Mutex<Script>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the answer returned for `key` until changed.
    pub fn set(&self, key: &str, answer: Answer) {
        self.lock().standing.insert(key.to_string(), answer);
    }

    /// Queues an answer returned once, ahead of the standing answer.
    pub fn push(&self, key: &str, answer: Answer) {
        self.lock()
            .queued
            .entry(key.to_string())
            .or_default()
            .push_back(answer);
    }

    /// Makes every fetch wait this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// How many fetches were issued for `key`.
    pub fn calls(&self, key: &str) -> usize {
        self.lock().calls.get(key).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FeedProvider for MemoryProvider {
    async fn fetch_snapshot(&self, feed_key: &str) -> Result<Track, ProviderError> {
        let delay = {
            let mut script = self.lock();
            *script.calls.entry(feed_key.to_string()).or_default() += 1;
            script.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.lock();
        if let Some(answer) = script
            .queued
            .get_mut(feed_key)
            .and_then(VecDeque::pop_front)
        {
            return answer;
        }
        script
            .standing
            .get(feed_key)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::Domain(UNKNOWN_FEED_MESSAGE.to_string())))
    }
}
