//! Inbound liveness monitoring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

/// Activity flag shared between the session reader and the monitor.
#[derive(Debug)]
pub struct Liveness {
    alive: AtomicBool,
}

impl Liveness {
    /// A fresh flag, initially alive.
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    /// Record that something arrived from the broker.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Read and reset the flag.
    pub fn take(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The broker went silent for the whole timeout window.
    TimedOut,
    /// The monitor was cancelled externally.
    Cancelled,
}

/// Watch `liveness` until the broker goes silent or `cancel` fires.
///
/// At each `interval` tick the flag is read and reset. A tick that finds it
/// unset counts as a miss; `timeout / interval` consecutive misses (at least
/// one) end the loop with [`HeartbeatResult::TimedOut`].
pub async fn run_heartbeat(
    liveness: Arc<Liveness>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    let mut missed: u32 = 0;
    let interval_ms = interval.as_millis().max(1);
    let max_missed = u32::try_from(timeout.as_millis() / interval_ms)
        .unwrap_or(u32::MAX)
        .max(1);

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if liveness.take() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
