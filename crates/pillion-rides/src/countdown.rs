//! Per-offer countdown timer.
//!
//! Each presented offer with a deadline owns one [`Countdown`]. The timer
//! ticks at a fixed resolution to publish remaining seconds and fires its
//! expiry callback exactly once when the deadline passes. Cancelling (or
//! dropping) one countdown never affects another.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// A cancellable countdown owned by one offer.
#[derive(Debug)]
pub struct Countdown {
    cancel: CancellationToken,
    remaining: Arc<AtomicU64>,
}

impl Countdown {
    /// Spawn a countdown of `duration`.
    ///
    /// `on_tick` receives the remaining whole seconds (rounded up) every
    /// `tick`. `on_expire` runs once when the deadline is reached, unless the
    /// countdown was cancelled first. A zero duration expires immediately.
    pub fn start<T, E>(duration: Duration, tick: Duration, on_tick: T, on_expire: E) -> Self
    where
        T: Fn(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let remaining = Arc::new(AtomicU64::new(ceil_secs(duration)));
        let deadline = Instant::now() + duration;
        let tick = tick.max(Duration::from_millis(1));

        let task_cancel = cancel.clone();
        let task_remaining = Arc::clone(&remaining);
        drop(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + tick, tick);
            loop {
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => return,
                    () = time::sleep_until(deadline) => {
                        task_remaining.store(0, Ordering::Relaxed);
                        if !task_cancel.is_cancelled() {
                            on_expire();
                        }
                        return;
                    }
                    _ = ticker.tick() => {
                        let left = ceil_secs(deadline.saturating_duration_since(Instant::now()));
                        task_remaining.store(left, Ordering::Relaxed);
                        on_tick(left);
                    }
                }
            }
        }));

        Self { cancel, remaining }
    }

    /// Remaining whole seconds, rounded up.
    pub fn remaining_secs(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Stop the countdown. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the countdown was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test(start_paused = true)]
    async fn expires_at_deadline_and_ticks_down() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let t = Arc::clone(&ticks);
        let (tx, rx) = oneshot::channel();
        let started = Instant::now();

        let countdown = Countdown::start(
            Duration::from_secs(5),
            Duration::from_secs(1),
            move |left| t.lock().push(left),
            move || {
                let _ = tx.send(Instant::now());
            },
        );
        assert_eq!(countdown.remaining_secs(), 5);

        let fired_at = rx.await.unwrap();
        assert_eq!(fired_at - started, Duration::from_secs(5));
        assert_eq!(countdown.remaining_secs(), 0);
        assert_eq!(*ticks.lock(), vec![4, 3, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_countdown_never_fires() {
        let (tx, rx) = oneshot::channel::<()>();
        let countdown = Countdown::start(
            Duration::from_secs(5),
            Duration::from_secs(1),
            |_| {},
            move || {
                let _ = tx.send(());
            },
        );
        time::sleep(Duration::from_secs(2)).await;
        countdown.cancel();
        assert!(countdown.is_cancelled());
        // Sender dropped without sending once the task exits.
        assert!(rx.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_one_leaves_others_running() {
        let (tx_a, rx_a) = oneshot::channel::<()>();
        let (tx_b, rx_b) = oneshot::channel::<()>();
        let a = Countdown::start(Duration::from_secs(3), Duration::from_secs(1), |_| {}, move || {
            let _ = tx_a.send(());
        });
        let _b = Countdown::start(Duration::from_secs(3), Duration::from_secs(1), |_| {}, move || {
            let _ = tx_b.send(());
        });
        drop(a);
        assert!(rx_a.await.is_err());
        assert!(rx_b.await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_expires_immediately() {
        let (tx, rx) = oneshot::channel::<()>();
        let _c = Countdown::start(Duration::ZERO, Duration::from_secs(1), |_| {}, move || {
            let _ = tx.send(());
        });
        assert!(rx.await.is_ok());
    }

    #[test]
    fn rounding() {
        assert_eq!(ceil_secs(Duration::from_millis(4001)), 5);
        assert_eq!(ceil_secs(Duration::from_secs(4)), 4);
        assert_eq!(ceil_secs(Duration::ZERO), 0);
    }
}
