//! # lib_hub
//!
//! The engine behind the feed notification hub. Clients hold a persistent
//! connection, subscribe to feed keys, and get a push message whenever the
//! snapshot behind a key changes.
//!
//! The crate is organised the same way as the rest of the workspace: one
//! folder per concern, each re-exporting its primary structs.
//!
//! - **`core`**: connection registry, feed index, change detector, event bus,
//!   heartbeat monitor, poll scheduler and message router.
//! - **`protocol`**: the JSON wire messages (`op` + `d`).
//! - **`transport`**: the seam towards whatever moves bytes to clients.
//! - **`provider`**: the seam towards the external feed API, plus the
//!   concrete Last.fm provider (feature `providers`).
//! - **`retrieve`**: the retrying HTTP client (feature `retrieve`).

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod core;
pub mod error;
pub mod protocol;
pub mod provider;
#[cfg(feature = "retrieve")]
pub mod retrieve;
pub mod transport;

// --- Public API Re-exports ---
pub use crate::core::{ConnectionId, FeedEvent, Hub, HubSettings, MessageRouter, PollScheduler};
pub use error::{HubError, HubResult};
pub use protocol::{ServerMessage, Track};
pub use provider::{FeedProvider, ProviderError};
pub use transport::{ChannelTransport, Outbound, Transport};
