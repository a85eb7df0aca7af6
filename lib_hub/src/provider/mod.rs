//! # Feed Providers
//!
//! The seam towards the external data source. The poll scheduler asks a
//! [`FeedProvider`] for the current snapshot of a feed key and reacts to the
//! kind of [`ProviderError`] it gets back.

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::Track;

pub mod memory;

#[cfg(feature = "providers")]
pub mod lastfm;

pub use memory::MemoryProvider;

#[cfg(feature = "providers")]
pub use lastfm::LastFmProvider;

/// Why a snapshot could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The upstream API rejected the feed key (unknown user, ...). Terminal
    /// for the feed.
    #[error("{0}")]
    Domain(String),

    /// The feed exists but has nothing to show yet.
    #[error("{0}")]
    NoData(String),

    /// Network failure, timeout, 5xx or an undecodable body. Retried on the
    /// next sweep.
    #[error("transient provider failure: {0}")]
    Transient(String),
}

/// Source of feed snapshots.
#[async_trait]
pub trait FeedProvider: Send + Sync {
    async fn fetch_snapshot(&self, feed_key: &str) -> Result<Track, ProviderError>;
}
