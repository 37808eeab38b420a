//! Subscription registry.
//!
//! Maps subscription keys to one live handler each and multiplexes them over
//! the single broker session. The STOMP subscription id on the wire *is* the
//! key, so an inbound `MESSAGE` is routed by its `subscription` header.
//!
//! The registry is attached to a session's outbound channel while connected
//! and detached (with every entry dropped) when the session ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use pillion_core::SubscriptionKey;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::RealtimeError;
use crate::stomp::Frame;
use crate::topics::{BrokerEvent, Topic};

/// Receives decoded events for one subscription.
///
/// Called synchronously on the session task; long work belongs on a spawned
/// task.
pub type EventHandler = Arc<dyn Fn(BrokerEvent) + Send + Sync>;

struct Entry {
    topic: Topic,
    handler: EventHandler,
}

#[derive(Default)]
struct State {
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    entries: HashMap<SubscriptionKey, Entry>,
}

/// Key → handler mapping for the live session.
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<State>,
    delivered: AtomicU64,
    decode_failures: AtomicU64,
}

impl SubscriptionRegistry {
    /// Empty, detached registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `topic`.
    ///
    /// The key is, in order of preference: the caller's `key`, the topic's
    /// natural key, or a generated one. An existing subscription under the
    /// same key is replaced. Fails with [`RealtimeError::NotConnected`] when
    /// no session is attached; requests are never queued.
    pub fn subscribe(
        &self,
        topic: Topic,
        handler: impl Fn(BrokerEvent) + Send + Sync + 'static,
        key: Option<SubscriptionKey>,
    ) -> Result<SubscriptionKey, RealtimeError> {
        let key = key
            .or_else(|| topic.natural_key())
            .unwrap_or_else(SubscriptionKey::generate);

        let mut state = self.state.lock();
        let Some(outbound) = state.outbound.clone() else {
            return Err(RealtimeError::NotConnected);
        };

        if state.entries.remove(&key).is_some() {
            debug!(key = %key, "replacing existing subscription");
            let _ = outbound.send(Frame::unsubscribe(&key));
        }
        outbound
            .send(Frame::subscribe(&key, &topic.destination()))
            .map_err(|_| RealtimeError::Closed)?;

        info!(key = %key, topic = %topic, "subscribed");
        let _ = state.entries.insert(
            key.clone(),
            Entry {
                topic,
                handler: Arc::new(handler),
            },
        );
        Ok(key)
    }

    /// Remove the subscription under `key`. Unknown keys are a no-op.
    ///
    /// Returns whether a subscription was removed.
    pub fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.remove(key) else {
            return false;
        };
        if let Some(outbound) = &state.outbound {
            let _ = outbound.send(Frame::unsubscribe(key));
        }
        info!(key = %key, topic = %entry.topic, "unsubscribed");
        true
    }

    /// Best-effort removal of every subscription. Returns how many were
    /// removed.
    pub fn unsubscribe_all(&self) -> usize {
        let mut state = self.state.lock();
        let entries = std::mem::take(&mut state.entries);
        if let Some(outbound) = &state.outbound {
            for key in entries.keys() {
                if outbound.send(Frame::unsubscribe(key)).is_err() {
                    debug!(key = %key, "session gone, skipping unsubscribe");
                }
            }
        }
        entries.len()
    }

    /// Route one `MESSAGE` frame to its handler.
    ///
    /// Unknown subscriptions and undecodable bodies are logged and counted;
    /// they never affect other subscriptions.
    pub fn dispatch(&self, frame: &Frame) {
        let Some(key) = frame.get("subscription") else {
            warn!(destination = ?frame.get("destination"), "message without subscription header");
            return;
        };
        let target = {
            let state = self.state.lock();
            state
                .entries
                .get(key)
                .map(|e| (e.topic.clone(), Arc::clone(&e.handler)))
        };
        let Some((topic, handler)) = target else {
            debug!(key, "message for unknown subscription dropped");
            return;
        };

        match BrokerEvent::decode(&topic, &frame.body) {
            Ok(event) => {
                let _ = self.delivered.fetch_add(1, Ordering::Relaxed);
                handler(event);
            }
            Err(error) => {
                let _ = self.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key, topic = %topic, %error, "failed to decode frame");
            }
        }
    }

    /// Whether `key` is subscribed.
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Current keys.
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.state.lock().entries.keys().cloned().collect()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events handed to handlers so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Frames dropped because their body failed to decode.
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn attach(&self, outbound: mpsc::UnboundedSender<Frame>) {
        self.state.lock().outbound = Some(outbound);
    }

    /// Drop the session channel and every entry. Returns how many entries
    /// were dropped.
    pub(crate) fn detach(&self) -> usize {
        let mut state = self.state.lock();
        state.outbound = None;
        let dropped = state.entries.len();
        state.entries.clear();
        dropped
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
