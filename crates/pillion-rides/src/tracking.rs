//! Per-ride tracking updates.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use pillion_core::{RideId, TrackingFrame};
use tracing::{debug, info, warn};

use crate::cache::{ActiveRideCache, ActiveRidePatch};

/// Ride statuses after which nothing is left to resume.
const FINISHED_STATUSES: &[&str] = &["COMPLETED", "CANCELLED", "CANCELED"];

/// What a tracking frame did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackingOutcome {
    /// Position or status recorded.
    Updated,
    /// The ride ended; the cache was cleared.
    Finished,
    /// The frame was for another ride.
    Ignored,
}

/// Applies tracking frames to the active ride cache and keeps the latest
/// update per ride.
pub struct RideTracker {
    cache: Arc<ActiveRideCache>,
    latest: Mutex<HashMap<RideId, TrackingFrame>>,
}

impl RideTracker {
    /// Tracker writing to `cache`.
    pub fn new(cache: Arc<ActiveRideCache>) -> Self {
        Self {
            cache,
            latest: Mutex::new(HashMap::new()),
        }
    }

    /// Apply a frame received on `ride_id`'s tracking topic.
    pub fn handle(&self, ride_id: &RideId, frame: TrackingFrame) -> TrackingOutcome {
        if frame.ride_id.as_ref().is_some_and(|id| id != ride_id) {
            warn!(%ride_id, frame_ride = ?frame.ride_id, "tracking frame for another ride");
            return TrackingOutcome::Ignored;
        }

        let status = frame.status.clone();
        let _ = self.latest.lock().insert(ride_id.clone(), frame);

        let Some(status) = status else {
            return TrackingOutcome::Updated;
        };
        let cached = self.cache.load();
        let is_cached_ride = cached
            .as_ref()
            .is_some_and(|r| r.ride_id.as_ref() == Some(ride_id));

        if FINISHED_STATUSES.contains(&status.as_str()) {
            info!(%ride_id, %status, "ride finished");
            let _ = self.latest.lock().remove(ride_id);
            if is_cached_ride || cached.is_none() {
                self.cache.clear();
            }
            return TrackingOutcome::Finished;
        }

        if is_cached_ride {
            debug!(%ride_id, %status, "ride status updated");
            let _ = self.cache.save(ActiveRidePatch {
                ride_id: Some(ride_id.clone()),
                ..ActiveRidePatch::status(status)
            });
        }
        TrackingOutcome::Updated
    }

    /// The most recent update for `ride_id`.
    pub fn latest(&self, ride_id: &RideId) -> Option<TrackingFrame> {
        self.latest.lock().get(ride_id).cloned()
    }
}
