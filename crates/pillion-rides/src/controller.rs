//! Offer lifecycle controller.
//!
//! Turns inbound offer frames into presented offers, runs one countdown per
//! offer, and resolves each offer exactly once. Accept, reject, countdown
//! expiry, cancellation frames and supersession all race for the same
//! commit point ([`Book::commit`]); whichever gets there first wins and
//! every later attempt observes the terminal state and does nothing.
//!
//! The book lock is never held across an await. An accept marks its entry
//! as resolving, releases the lock for the backend call, and then tries to
//! commit; if the countdown committed `Expired` in the meantime the
//! confirmed accept is dropped with a warning.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use pillion_core::{Clock, OfferFrame, OfferKind, RequestId, RideId, Role};
use pillion_settings::OfferSettings;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::backend::{AcceptReceipt, RideBackend};
use crate::cache::{ActiveRideCache, ActiveRidePatch};
use crate::countdown::Countdown;
use crate::errors::OfferError;
use crate::offer::{Offer, OfferKey, OfferState, frame_keys};

/// Resolved keys remembered to swallow late echoes.
const HISTORY_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 64;

/// Where the UI should go after an accept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavigationTarget {
    /// The active ride screen for a direct or broadcast accept.
    ActiveRide {
        /// Ride ID, when the backend assigned one.
        ride_id: Option<RideId>,
        /// Accepted request.
        request_id: Option<RequestId>,
    },
    /// The shared ride a join request was approved into.
    SharedRide {
        /// The shared ride.
        ride_id: Option<RideId>,
    },
}

/// Observable controller events.
#[derive(Clone, Debug, PartialEq)]
pub enum OfferEvent {
    /// An offer became visible.
    Presented(Offer),
    /// Countdown progress.
    Tick {
        /// Offer key.
        key: OfferKey,
        /// Whole seconds left.
        remaining_secs: u64,
    },
    /// An offer reached a terminal state.
    Resolved {
        /// Offer key.
        key: OfferKey,
        /// Terminal state.
        state: OfferState,
    },
    /// An accept was confirmed and committed.
    Accepted {
        /// The accepted offer.
        offer: Offer,
        /// Post-accept destination.
        target: NavigationTarget,
    },
}

/// Outcome of an accept or reject request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// This call committed the state.
    Committed(OfferState),
    /// The offer was already terminal; nothing happened.
    AlreadyResolved(OfferState),
    /// Another accept for this offer is in flight.
    InProgress,
}

/// Side effects run once after an accept commits.
#[async_trait]
pub trait AcceptHooks: Send + Sync {
    /// Refresh the driver's earnings summary.
    async fn refresh_earnings(&self, offer: &Offer);
}

// ─────────────────────────────────────────────────────────────────────────────
// Book
// ─────────────────────────────────────────────────────────────────────────────

struct Entry {
    offer: Offer,
    generation: u64,
    resolving: bool,
    countdown: Option<Countdown>,
}

#[derive(Default)]
struct Book {
    entries: Vec<Entry>,
    history: HashMap<OfferKey, OfferState>,
    order: VecDeque<OfferKey>,
    next_generation: u64,
}

impl Book {
    fn resolved_state(&self, keys: &[OfferKey]) -> Option<OfferState> {
        keys.iter().find_map(|k| self.history.get(k).copied())
    }

    fn position(&self, key: &OfferKey) -> Option<usize> {
        self.entries.iter().position(|e| e.offer.answers_to(key))
    }

    fn remember(&mut self, keys: Vec<OfferKey>, state: OfferState) {
        for key in keys {
            if self.history.insert(key.clone(), state).is_none() {
                self.order.push_back(key);
            }
        }
        while self.order.len() > HISTORY_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                let _ = self.history.remove(&old);
            }
        }
    }

    /// The single commit point: remove the entry for `generation` and
    /// record `state`. `None` if the entry is already gone.
    fn commit(&mut self, generation: u64, state: OfferState) -> Option<Offer> {
        let index = self.entries.iter().position(|e| e.generation == generation)?;
        let entry = self.entries.remove(index);
        if let Some(countdown) = &entry.countdown {
            countdown.cancel();
        }
        if state != OfferState::Superseded {
            self.remember(entry.offer.keys(), state);
        }
        Some(entry.offer)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Controller
// ─────────────────────────────────────────────────────────────────────────────

struct Shared {
    backend: Arc<dyn RideBackend>,
    cache: Arc<ActiveRideCache>,
    clock: Arc<dyn Clock>,
    settings: OfferSettings,
    hooks: RwLock<Option<Arc<dyn AcceptHooks>>>,
    events: broadcast::Sender<OfferEvent>,
    book: Mutex<Book>,
}

/// Presents, times and resolves driver offers.
///
/// Cheap to clone; clones share the same book.
#[derive(Clone)]
pub struct OfferController {
    inner: Arc<Shared>,
}

impl OfferController {
    /// Controller confirming accepts through `backend` and recording the
    /// resulting ride in `cache`.
    pub fn new(
        backend: Arc<dyn RideBackend>,
        cache: Arc<ActiveRideCache>,
        clock: Arc<dyn Clock>,
        settings: OfferSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Shared {
                backend,
                cache,
                clock,
                settings,
                hooks: RwLock::new(None),
                events,
                book: Mutex::new(Book::default()),
            }),
        }
    }

    /// Install post-accept hooks.
    pub fn set_hooks(&self, hooks: Arc<dyn AcceptHooks>) {
        *self.inner.hooks.write() = Some(hooks);
    }

    /// Subscribe to controller events.
    pub fn subscribe(&self) -> broadcast::Receiver<OfferEvent> {
        self.inner.events.subscribe()
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Handle an inbound offer frame. Returns the key of the offer it
    /// presented, if any.
    pub fn receive(&self, frame: OfferFrame) -> Option<OfferKey> {
        let keys = frame_keys(&frame);
        if keys.is_empty() {
            warn!(kind = ?frame.kind, "dropping offer frame without identifiers");
            return None;
        }

        let shared = &self.inner;
        let mut book = shared.book.lock();

        if frame.is_cancellation() {
            self.cancel_locked(&mut book, keys);
            return None;
        }

        if let Some(state) = book.resolved_state(&keys) {
            debug!(key = %keys[0], %state, "ignoring frame for resolved offer");
            return None;
        }

        let now = shared.clock.now();
        let offer = Offer::from_frame(frame, now);
        let key = offer.key();
        let remaining = offer.remaining(now);
        if remaining == Some(Duration::ZERO) {
            debug!(%key, "offer arrived past its deadline");
            book.remember(offer.keys(), OfferState::Expired);
            return None;
        }

        let overlapping: Vec<(usize, u64, bool)> = book
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.offer.overlaps(&offer))
            .map(|(index, e)| (index, e.generation, e.resolving))
            .collect();
        if overlapping.iter().any(|&(_, _, resolving)| resolving) {
            debug!(%key, "ignoring echo for offer being accepted");
            return None;
        }
        // Earlier indices are unaffected by removing later entries.
        let slot = overlapping
            .first()
            .map_or(book.entries.len(), |&(index, _, _)| index);
        for (_, generation, _) in overlapping {
            if let Some(old) = book.commit(generation, OfferState::Superseded) {
                info!(old = %old.key(), new = %key, "offer superseded");
                self.emit(OfferEvent::Resolved {
                    key: old.key(),
                    state: OfferState::Superseded,
                });
            }
        }

        book.next_generation += 1;
        let generation = book.next_generation;
        let countdown = remaining.map(|duration| self.start_countdown(key.clone(), generation, duration));

        info!(
            %key,
            kind = ?offer.kind,
            fare = offer.fare,
            remaining_secs = countdown.as_ref().map(Countdown::remaining_secs),
            "offer presented"
        );
        self.emit(OfferEvent::Presented(offer.clone()));
        book.entries.insert(
            slot,
            Entry {
                offer,
                generation,
                resolving: false,
                countdown,
            },
        );
        Some(key)
    }

    fn cancel_locked(&self, book: &mut Book, keys: Vec<OfferKey>) {
        let generation = book
            .entries
            .iter()
            .find(|e| keys.iter().any(|k| e.offer.answers_to(k)))
            .map(|e| e.generation);
        match generation.and_then(|g| book.commit(g, OfferState::Cancelled)) {
            Some(offer) => {
                info!(key = %offer.key(), "offer withdrawn");
                self.emit(OfferEvent::Resolved {
                    key: offer.key(),
                    state: OfferState::Cancelled,
                });
            }
            None if book.resolved_state(&keys).is_none() => {
                debug!(key = %keys[0], "cancellation for unseen offer");
                book.remember(keys, OfferState::Cancelled);
            }
            None => {}
        }
    }

    fn start_countdown(&self, key: OfferKey, generation: u64, duration: Duration) -> Countdown {
        let tick = Duration::from_millis(self.inner.settings.tick_ms);
        let on_tick = {
            let weak = Arc::downgrade(&self.inner);
            let key = key.clone();
            move |remaining_secs| {
                if let Some(shared) = weak.upgrade() {
                    let _ = shared.events.send(OfferEvent::Tick {
                        key: key.clone(),
                        remaining_secs,
                    });
                }
            }
        };
        let weak: Weak<Shared> = Arc::downgrade(&self.inner);
        Countdown::start(duration, tick, on_tick, move || {
            if let Some(inner) = weak.upgrade() {
                Self { inner }.expire(&key, generation);
            }
        })
    }

    fn expire(&self, key: &OfferKey, generation: u64) {
        let committed = self.inner.book.lock().commit(generation, OfferState::Expired);
        if committed.is_some() {
            info!(%key, "offer expired");
            self.emit(OfferEvent::Resolved {
                key: key.clone(),
                state: OfferState::Expired,
            });
        }
    }

    // ── Resolution ──────────────────────────────────────────────────

    /// Accept the offer addressed by `key`.
    ///
    /// Calls the kind-specific backend confirmation and commits `Accepted`
    /// on success. A failed call leaves the offer presented so the user can
    /// retry. Repeated accepts never issue a second backend call.
    pub async fn accept(&self, key: &OfferKey) -> Result<Resolution, OfferError> {
        let (offer, generation) = {
            let mut book = self.inner.book.lock();
            let Some(index) = book.position(key) else {
                return match book.resolved_state(std::slice::from_ref(key)) {
                    Some(state) => Ok(Resolution::AlreadyResolved(state)),
                    None => Err(OfferError::UnknownOffer(key.clone())),
                };
            };
            let entry = &mut book.entries[index];
            if entry.resolving {
                debug!(%key, "accept already in flight");
                return Ok(Resolution::InProgress);
            }
            entry.resolving = true;
            (entry.offer.clone(), entry.generation)
        };

        info!(%key, kind = ?offer.kind, "accepting offer");
        let backend = &self.inner.backend;
        let result = match offer.kind {
            OfferKind::DirectAssignment => backend.accept_direct(&offer).await,
            OfferKind::OpenBroadcast => backend.accept_broadcast(&offer).await,
            OfferKind::JoinRequest => backend.accept_join(&offer).await,
        };

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(error) => {
                let mut book = self.inner.book.lock();
                if let Some(entry) = book.entries.iter_mut().find(|e| e.generation == generation) {
                    entry.resolving = false;
                }
                warn!(%key, %error, "accept failed");
                return Err(error.into());
            }
        };

        let committed = {
            let mut book = self.inner.book.lock();
            match book.commit(generation, OfferState::Accepted) {
                Some(offer) => Ok(offer),
                None => Err(book
                    .resolved_state(&offer.keys())
                    .unwrap_or(OfferState::Expired)),
            }
        };

        match committed {
            Ok(offer) => {
                self.after_accept(offer, &receipt);
                Ok(Resolution::Committed(OfferState::Accepted))
            }
            Err(state) => {
                warn!(%key, %state, "accept confirmed after offer was resolved locally");
                Ok(Resolution::AlreadyResolved(state))
            }
        }
    }

    fn after_accept(&self, offer: Offer, receipt: &AcceptReceipt) {
        let key = offer.key();
        let ride_id = receipt.ride_id.clone().or_else(|| offer.ride_id.clone());
        let target = match offer.kind {
            OfferKind::JoinRequest => NavigationTarget::SharedRide {
                ride_id: ride_id.clone(),
            },
            OfferKind::DirectAssignment | OfferKind::OpenBroadcast => NavigationTarget::ActiveRide {
                ride_id: ride_id.clone(),
                request_id: receipt.request_id.clone().or_else(|| offer.request_id.clone()),
            },
        };

        let patch = match offer.kind {
            OfferKind::JoinRequest => ActiveRidePatch {
                ride_id,
                role: Some(Role::Driver),
                ..ActiveRidePatch::default()
            },
            OfferKind::DirectAssignment | OfferKind::OpenBroadcast => ActiveRidePatch {
                ride_id,
                request_id: receipt.request_id.clone().or_else(|| offer.request_id.clone()),
                role: Some(Role::Driver),
                status: Some(receipt.status.clone().unwrap_or_else(|| "ACCEPTED".to_string())),
                counterpart: Some(offer.rider.clone()),
                pickup: Some(offer.pickup.clone()),
                dropoff: Some(offer.dropoff.clone()),
                fare: Some(offer.fare).filter(|f| *f > 0.0),
            },
        };
        let _ = self.inner.cache.save(patch);

        let hooks = self.inner.hooks.read().clone();
        if let Some(hooks) = hooks {
            let offer = offer.clone();
            drop(tokio::spawn(async move {
                hooks.refresh_earnings(&offer).await;
            }));
        }

        info!(%key, ?target, "offer accepted");
        self.emit(OfferEvent::Resolved {
            key,
            state: OfferState::Accepted,
        });
        self.emit(OfferEvent::Accepted { offer, target });
    }

    /// Decline the offer addressed by `key`.
    ///
    /// Resolves locally at once; the backend is told in the background and
    /// a failure there is only logged.
    pub fn reject(&self, key: &OfferKey, reason: Option<&str>) -> Result<Resolution, OfferError> {
        let offer = {
            let mut book = self.inner.book.lock();
            let Some(index) = book.position(key) else {
                return match book.resolved_state(std::slice::from_ref(key)) {
                    Some(state) => Ok(Resolution::AlreadyResolved(state)),
                    None => Err(OfferError::UnknownOffer(key.clone())),
                };
            };
            if book.entries[index].resolving {
                return Ok(Resolution::InProgress);
            }
            let generation = book.entries[index].generation;
            book.commit(generation, OfferState::Rejected)
                .ok_or_else(|| OfferError::UnknownOffer(key.clone()))?
        };

        info!(%key, "offer rejected");
        self.emit(OfferEvent::Resolved {
            key: key.clone(),
            state: OfferState::Rejected,
        });

        let backend = Arc::clone(&self.inner.backend);
        let reason = reason.map_or_else(|| self.inner.settings.reject_reason.clone(), str::to_string);
        drop(tokio::spawn(async move {
            if let Err(error) = backend.reject_offer(&offer, &reason).await {
                warn!(key = %offer.key(), %error, "reject call failed");
            }
        }));
        Ok(Resolution::Committed(OfferState::Rejected))
    }

    /// Withdraw every presented offer without telling the backend.
    pub fn clear(&self) {
        let mut book = self.inner.book.lock();
        let generations: Vec<u64> = book.entries.iter().map(|e| e.generation).collect();
        for generation in generations {
            if let Some(offer) = book.commit(generation, OfferState::Cancelled) {
                self.emit(OfferEvent::Resolved {
                    key: offer.key(),
                    state: OfferState::Cancelled,
                });
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// The most recently presented offer.
    pub fn current(&self) -> Option<Offer> {
        self.inner.book.lock().entries.last().map(|e| e.offer.clone())
    }

    /// Every presented offer, oldest first.
    pub fn presented(&self) -> Vec<Offer> {
        self.inner
            .book
            .lock()
            .entries
            .iter()
            .map(|e| e.offer.clone())
            .collect()
    }

    /// Presented join requests for `ride_id`.
    pub fn pending_join_requests(&self, ride_id: &RideId) -> Vec<Offer> {
        self.inner
            .book
            .lock()
            .entries
            .iter()
            .filter(|e| e.offer.kind == OfferKind::JoinRequest && e.offer.ride_id.as_ref() == Some(ride_id))
            .map(|e| e.offer.clone())
            .collect()
    }

    /// Whole seconds left on the offer's countdown.
    pub fn remaining_secs(&self, key: &OfferKey) -> Option<u64> {
        let book = self.inner.book.lock();
        let index = book.position(key)?;
        book.entries[index].countdown.as_ref().map(Countdown::remaining_secs)
    }

    /// Current state of the offer addressed by `key`, if known.
    pub fn state_of(&self, key: &OfferKey) -> Option<OfferState> {
        let book = self.inner.book.lock();
        if book.position(key).is_some() {
            return Some(OfferState::Presented);
        }
        book.resolved_state(std::slice::from_ref(key))
    }

    fn emit(&self, event: OfferEvent) {
        let _ = self.inner.events.send(event);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
