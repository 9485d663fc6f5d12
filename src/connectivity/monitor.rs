//! Connectivity state tracking with deduplicated transition events

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use super::probe::ConnectivityProbe;

/// Device reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Online,
    Offline,
}

/// Deduplicated connectivity transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

/// Read-only snapshot handle shared with the rest of the pipeline.
///
/// The monitor is the only writer; everyone else reads atomically.
#[derive(Clone)]
pub struct ConnectivityHandle {
    online: Arc<AtomicBool>,
}

impl ConnectivityHandle {
    /// Handle pinned to an initial state, for callers without a monitor
    /// (tests, single-shot tools)
    pub fn fixed(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Latest known state
    pub fn current(&self) -> ConnectivityState {
        if self.online.load(Ordering::SeqCst) {
            ConnectivityState::Online
        } else {
            ConnectivityState::Offline
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Tracks device connectivity from native notifications plus a periodic
/// probe poll, emitting a transition event only when the state changes.
pub struct ConnectivityMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    online: Arc<AtomicBool>,
    event_tx: broadcast::Sender<ConnectivityEvent>,
    poll_interval: Duration,
}

impl ConnectivityMonitor {
    /// Create a monitor. Starts optimistically online; the first poll
    /// corrects that if the device is actually unreachable.
    pub fn new(probe: Arc<dyn ConnectivityProbe>, poll_interval: Duration) -> Self {
        let (event_tx, _) = broadcast::channel(16);
        Self {
            probe,
            online: Arc::new(AtomicBool::new(true)),
            event_tx,
            poll_interval,
        }
    }

    /// Snapshot handle for readers
    pub fn handle(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            online: Arc::clone(&self.online),
        }
    }

    /// Subscribe to connectivity transitions
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.event_tx.subscribe()
    }

    /// Run the monitor loop.
    ///
    /// `native_rx` carries platform online/offline notifications relayed by
    /// the front end; the interval poll re-checks via the probe and emits a
    /// transition only if the polled value differs from the last known one.
    pub async fn run(&self, mut native_rx: mpsc::Receiver<bool>) {
        let mut poll = tokio::time::interval(self.poll_interval);
        // The first tick fires immediately; use it as the initial check.
        info!(interval_secs = self.poll_interval.as_secs(), "connectivity monitor started");

        loop {
            tokio::select! {
                reported = native_rx.recv() => {
                    match reported {
                        Some(online) => {
                            debug!(online, "native connectivity notification");
                            self.apply(online);
                        }
                        None => {
                            info!("native connectivity channel closed, monitor stopping");
                            break;
                        }
                    }
                }
                _ = poll.tick() => {
                    let online = self.probe.check().await;
                    debug!(online, "connectivity poll");
                    self.apply(online);
                }
            }
        }
    }

    /// Record an observation, emitting a transition event on change
    fn apply(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        let event = if online {
            ConnectivityEvent::BecameOnline
        } else {
            ConnectivityEvent::BecameOffline
        };
        info!(?event, "connectivity transition");
        let _ = self.event_tx.send(event);
    }
}
