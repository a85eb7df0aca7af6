//! # Heartbeat Monitor
//!
//! One timer per connection. The timer fires every `ping_interval + grace`;
//! on each tick the connection must have sent at least one heartbeat since
//! the previous tick, and must hold at least one subscription. Either failure
//! terminates the connection. Nothing is retried.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::core::{ConnectionId, ConnectionRegistry, Hub};

pub const NO_HEARTBEAT_REASON: &str = "No heartbeat received in time";
pub const INACTIVITY_REASON: &str =
    "Cleanup because of inactivity. Please subscribe to a channel immediately after connecting.";

/// Result of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Healthy,
    MissedHeartbeat,
    /// Alive, but holding no subscriptions.
    Inactive,
    /// The connection is no longer registered.
    Gone,
}

impl Liveness {
    /// The close reason for a failed check.
    pub fn reason(self) -> Option<&'static str> {
        match self {
            Liveness::MissedHeartbeat => Some(NO_HEARTBEAT_REASON),
            Liveness::Inactive => Some(INACTIVITY_REASON),
            Liveness::Healthy | Liveness::Gone => None,
        }
    }
}

pub struct HeartbeatMonitor {
    period: Duration,
    timers: Mutex<HashMap<ConnectionId, CancellationToken>>,
}

impl HeartbeatMonitor {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs one check and opens the next window by clearing the alive flag.
    pub fn check(&self, connections: &ConnectionRegistry, id: ConnectionId) -> Liveness {
        match connections.take_alive(id) {
            None => Liveness::Gone,
            Some(false) => Liveness::MissedHeartbeat,
            Some(true) if connections.subscription_count(id) == 0 => Liveness::Inactive,
            Some(true) => Liveness::Healthy,
        }
    }

    /// Starts the timer for `id`. A timer already running for the same id is
    /// replaced.
    ///
    /// The task holds only a weak reference to the hub, so a dropped hub
    /// ends every timer on its next tick.
    pub fn start(&self, hub: &Arc<Hub>, id: ConnectionId) {
        let token = CancellationToken::new();
        if let Some(previous) = self.lock().insert(id, token.clone()) {
            previous.cancel();
        }

        let weak = Arc::downgrade(hub);
        let period = self.period;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(hub) = weak.upgrade() else { break };
                        let liveness = hub.heartbeat().check(hub.connections(), id);
                        log::trace!("Heartbeat check for {}: {:?}", id, liveness);
                        match liveness {
                            Liveness::Healthy => {}
                            Liveness::Gone => {
                                hub.heartbeat().stop(id);
                                break;
                            }
                            failed => {
                                if let Some(reason) = failed.reason() {
                                    hub.close(id, reason);
                                }
                                hub.heartbeat().stop(id);
                                break;
                            }
                        }
                    }
                }
            }
        });
    }

    /// Cancels the timer for `id`. Returns `false` if none was running.
    pub fn stop(&self, id: ConnectionId) -> bool {
        match self.lock().remove(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        let timers: Vec<CancellationToken> = self.lock().drain().map(|(_, token)| token).collect();
        for token in timers {
            token.cancel();
        }
    }

    /// Number of running timers.
    pub fn active(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, CancellationToken>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
