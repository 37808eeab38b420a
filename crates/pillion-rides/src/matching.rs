//! Rider-side matching tracker.
//!
//! Follows the rider's open request through the matching frames until it
//! is either matched to a driver or definitively unmatched. The first
//! terminal frame wins; later frames for the same request are ignored.

use std::sync::Arc;

use pillion_core::{Counterpart, MatchingFrame, RequestId, RideId, Role};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::cache::{ActiveRideCache, ActiveRidePatch, ActiveRideRecord};

const MATCHED_STATUSES: &[&str] = &["ACCEPTED", "MATCHED", "DRIVER_ASSIGNED", "JOIN_ACCEPTED"];
const UNMATCHED_STATUSES: &[&str] = &[
    "NO_DRIVER_FOUND",
    "EXPIRED",
    "CANCELLED",
    "CANCELED",
    "JOIN_REJECTED",
];

/// Matching progress of the rider's request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MatchState {
    /// No request being tracked.
    #[default]
    Idle,
    /// Waiting for a driver.
    Searching {
        /// The open request.
        request_id: Option<RequestId>,
    },
    /// A driver accepted.
    Matched {
        /// Assigned ride.
        ride_id: Option<RideId>,
        /// The matched request.
        request_id: Option<RequestId>,
        /// The driver.
        driver: Counterpart,
    },
    /// The request ended without a driver.
    Unmatched {
        /// Terminal status that ended it.
        status: String,
    },
}

impl MatchState {
    /// Whether the request is settled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Matched { .. } | Self::Unmatched { .. })
    }

    /// The request this state refers to, if known.
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Searching { request_id } | Self::Matched { request_id, .. } => request_id.as_ref(),
            Self::Idle | Self::Unmatched { .. } => None,
        }
    }
}

/// Consumes rider-matching frames and keeps the active ride cache in step.
pub struct MatchTracker {
    cache: Arc<ActiveRideCache>,
    state: watch::Sender<MatchState>,
}

impl MatchTracker {
    /// Tracker writing to `cache`.
    pub fn new(cache: Arc<ActiveRideCache>) -> Self {
        let (state, _) = watch::channel(MatchState::Idle);
        Self { cache, state }
    }

    /// Start tracking a freshly submitted request.
    pub fn begin(&self, request_id: Option<RequestId>) {
        info!(request_id = ?request_id, "searching for a driver");
        let _ = self.state.send_replace(MatchState::Searching { request_id });
    }

    /// Stop tracking without touching the cache.
    pub fn reset(&self) {
        let _ = self.state.send_replace(MatchState::Idle);
    }

    /// Current state.
    pub fn state(&self) -> MatchState {
        self.state.borrow().clone()
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<MatchState> {
        self.state.subscribe()
    }

    /// Apply one matching frame. Returns whether it changed the state.
    pub fn handle(&self, frame: MatchingFrame) -> bool {
        let status = frame.status.as_str();
        let matched = MATCHED_STATUSES.contains(&status);
        let unmatched = UNMATCHED_STATUSES.contains(&status);
        let cached = if *self.state.borrow() == MatchState::Idle {
            self.cache.load()
        } else {
            None
        };

        let mut committed = None;
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                debug!(status, current = ?state, "ignoring matching frame after resolution");
                return false;
            }
            if *state == MatchState::Idle
                && cached.as_ref().is_some_and(|record| !refers_to(&frame, record))
            {
                debug!(status, request_id = ?frame.request_id, "matching frame unrelated to the cached ride");
                return false;
            }
            if let Some(tracked) = state.request_id() {
                if frame.request_id.as_ref().is_some_and(|id| id != tracked) {
                    debug!(status, request_id = ?frame.request_id, "matching frame for another request");
                    return false;
                }
            }
            let next = if matched {
                MatchState::Matched {
                    ride_id: frame.ride_id.clone(),
                    request_id: frame
                        .request_id
                        .clone()
                        .or_else(|| state.request_id().cloned()),
                    driver: frame.driver.clone(),
                }
            } else if unmatched {
                MatchState::Unmatched {
                    status: frame.status.clone(),
                }
            } else {
                let request_id = frame
                    .request_id
                    .clone()
                    .or_else(|| state.request_id().cloned());
                let next = MatchState::Searching { request_id };
                if *state == next {
                    return false;
                }
                *state = next;
                return true;
            };
            committed = Some(next.clone());
            *state = next;
            true
        });

        match committed {
            Some(MatchState::Matched {
                ride_id,
                request_id,
                driver,
            }) => {
                info!(?ride_id, ?request_id, status, "rider matched");
                let _ = self.cache.save(ActiveRidePatch {
                    ride_id,
                    request_id,
                    role: Some(Role::Rider),
                    status: Some(frame.status),
                    counterpart: Some(driver),
                    pickup: Some(frame.pickup).filter(|l| !l.is_empty()),
                    dropoff: Some(frame.dropoff).filter(|l| !l.is_empty()),
                    fare: Some(frame.fare).filter(|f| *f > 0.0),
                });
            }
            Some(MatchState::Unmatched { status }) => {
                info!(status, "rider request ended without a driver");
                self.cache.clear();
            }
            _ => {}
        }
        changed
    }

    /// Resolve locally after the rider cancelled. No-op once settled.
    pub fn cancel(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = MatchState::Unmatched {
                status: "CANCELLED".to_string(),
            };
            true
        });
        if changed {
            self.cache.clear();
        }
        changed
    }
}

/// Whether `frame` names the request or ride held in `record`.
fn refers_to(frame: &MatchingFrame, record: &ActiveRideRecord) -> bool {
    let same_request = frame.request_id.is_some() && frame.request_id == record.request_id;
    let same_ride = frame.ride_id.is_some() && frame.ride_id == record.ride_id;
    same_request || same_ride
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
