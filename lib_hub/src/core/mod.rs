//! # Core
//!
//! The subscription/dispatch engine. Leaves first:
//!
//! - [`ChangeDetector`]: last emitted snapshot per feed.
//! - [`EventBus`]: topic-keyed listeners addressed by [`ListenerHandle`].
//! - [`FeedRegistry`]: feed key → subscribed connections.
//! - [`ConnectionRegistry`]: connection lifecycle, liveness and subscriptions.
//! - [`HeartbeatMonitor`]: per-connection liveness timer.
//! - [`Hub`]: owns all of the above and implements the composite operations.
//! - [`PollScheduler`]: periodic prune + fetch + diff + emit.
//! - [`MessageRouter`]: inbound frame validation and opcode dispatch.

pub mod change_detector;
pub mod connection_registry;
pub mod event_bus;
pub mod feed_registry;
pub mod heartbeat;
pub mod hub;
pub mod poll_scheduler;
pub mod router;

pub use change_detector::ChangeDetector;
pub use connection_registry::{ConnectionId, ConnectionRegistry, ConnectionState};
pub use event_bus::{EventBus, ListenerHandle};
pub use feed_registry::FeedRegistry;
pub use heartbeat::{HeartbeatMonitor, Liveness};
pub use hub::{FeedEvent, Hub, HubSettings};
pub use poll_scheduler::{FetchOutcome, PollScheduler, SweepReport};
pub use router::{Incoming, MessageRouter};
