//! Active ride cache.
//!
//! A durable record of the ride or request the user is currently engaged
//! in, used to resume after restarts and reconnects. The record is only
//! trusted when its identifiers are real (not sentinel strings leaked from
//! an unresolved template) and it is younger than the validity window;
//! anything else is cleared and reported as absent.
//!
//! Storage failures are logged and swallowed: callers never see them.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pillion_core::normalize::is_sentinel_id;
use pillion_core::{Clock, Counterpart, Location, RequestId, RideId, RideSummary, Role};
use pillion_settings::CacheSettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::slot::{DurableSlot, FileSlot};

/// The persisted record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRideRecord {
    /// Ride ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<RideId>,
    /// Request ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// The local user's side of the ride.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Last known status (upper-case).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// The other party.
    #[serde(default)]
    pub counterpart: Counterpart,
    /// Pickup descriptor.
    #[serde(default)]
    pub pickup: Location,
    /// Dropoff descriptor.
    #[serde(default)]
    pub dropoff: Location,
    /// Fare.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fare: Option<f64>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// A partial update. `None` fields leave the stored value untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActiveRidePatch {
    /// Ride ID.
    pub ride_id: Option<RideId>,
    /// Request ID.
    pub request_id: Option<RequestId>,
    /// Role.
    pub role: Option<Role>,
    /// Status.
    pub status: Option<String>,
    /// Counterpart, replaced as a whole.
    pub counterpart: Option<Counterpart>,
    /// Pickup, replaced as a whole.
    pub pickup: Option<Location>,
    /// Dropoff, replaced as a whole.
    pub dropoff: Option<Location>,
    /// Fare.
    pub fare: Option<f64>,
}

impl ActiveRidePatch {
    /// Patch describing an in-flight request reported by the backend.
    pub fn from_summary(summary: &RideSummary, role: Role) -> Self {
        Self {
            ride_id: summary.ride_id.clone(),
            request_id: summary.request_id.clone(),
            role: Some(role),
            status: summary.status.clone(),
            counterpart: Some(summary.counterpart.clone()),
            pickup: Some(summary.pickup.clone()).filter(|l| !l.is_empty()),
            dropoff: Some(summary.dropoff.clone()).filter(|l| !l.is_empty()),
            fare: Some(summary.fare).filter(|f| *f > 0.0),
        }
    }

    /// Status-only patch.
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Self::default()
        }
    }

    fn switches_ride(&self, record: &ActiveRideRecord) -> bool {
        let differs = |patch: Option<&str>, stored: Option<&str>| {
            matches!((patch, stored), (Some(p), Some(s)) if p != s)
        };
        differs(self.ride_id.as_deref(), record.ride_id.as_deref())
            || differs(self.request_id.as_deref(), record.request_id.as_deref())
    }

    fn apply(self, record: &mut ActiveRideRecord) {
        if let Some(v) = self.ride_id {
            record.ride_id = Some(v);
        }
        if let Some(v) = self.request_id {
            record.request_id = Some(v);
        }
        if let Some(v) = self.role {
            record.role = Some(v);
        }
        if let Some(v) = self.status {
            record.status = Some(v);
        }
        if let Some(v) = self.counterpart {
            record.counterpart = v;
        }
        if let Some(v) = self.pickup {
            record.pickup = v;
        }
        if let Some(v) = self.dropoff {
            record.dropoff = v;
        }
        if let Some(v) = self.fare {
            record.fare = Some(v);
        }
    }
}

/// Why a stored record was discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Neither a ride ID nor a request ID.
    MissingIdentifiers,
    /// An identifier is a sentinel string.
    SentinelIdentifier(&'static str),
    /// Older than the validity window.
    Stale {
        /// Age in whole minutes.
        age_minutes: i64,
    },
}

impl ActiveRideRecord {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            ride_id: None,
            request_id: None,
            role: None,
            status: None,
            counterpart: Counterpart::default(),
            pickup: Location::default(),
            dropoff: Location::default(),
            fare: None,
            updated_at: now,
        }
    }

    fn check_identifiers(&self) -> Result<(), Rejection> {
        if self.ride_id.is_none() && self.request_id.is_none() {
            return Err(Rejection::MissingIdentifiers);
        }
        if self.ride_id.as_deref().is_some_and(is_sentinel_id) {
            return Err(Rejection::SentinelIdentifier("rideId"));
        }
        if self.request_id.as_deref().is_some_and(is_sentinel_id) {
            return Err(Rejection::SentinelIdentifier("requestId"));
        }
        Ok(())
    }

    /// Validate against `now` and the validity window.
    pub fn validate(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> Result<(), Rejection> {
        self.check_identifiers()?;
        let age = now - self.updated_at;
        if age >= max_age {
            return Err(Rejection::Stale {
                age_minutes: age.num_minutes(),
            });
        }
        Ok(())
    }
}

/// The cache service.
pub struct ActiveRideCache {
    slot: Arc<dyn DurableSlot>,
    clock: Arc<dyn Clock>,
    max_age: chrono::Duration,
    writer: Mutex<()>,
}

impl ActiveRideCache {
    /// Cache over `slot` with a validity window of `max_age`.
    pub fn new(slot: Arc<dyn DurableSlot>, clock: Arc<dyn Clock>, max_age: Duration) -> Self {
        Self {
            slot,
            clock,
            max_age: chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX),
            writer: Mutex::new(()),
        }
    }

    /// File-backed cache configured from settings.
    pub fn from_settings(settings: &CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(FileSlot::new(&settings.path)),
            clock,
            Duration::from_secs(u64::from(settings.max_age_hours) * 3600),
        )
    }

    /// Merge `patch` into the stored record and stamp the current time.
    ///
    /// A patch naming a different ride or request starts a fresh record.
    /// Returns the record as written, or `None` if it was not written.
    pub fn save(&self, patch: ActiveRidePatch) -> Option<ActiveRideRecord> {
        let _guard = self.writer.lock();
        let now = self.clock.now();
        let mut record = match self.read_valid(now) {
            Some(existing) if !patch.switches_ride(&existing) => existing,
            _ => ActiveRideRecord::empty(now),
        };
        patch.apply(&mut record);
        record.updated_at = now;
        self.write_record(record)
    }

    /// Overwrite the stored record with exactly `patch`.
    pub fn replace(&self, patch: ActiveRidePatch) -> Option<ActiveRideRecord> {
        let _guard = self.writer.lock();
        let now = self.clock.now();
        let mut record = ActiveRideRecord::empty(now);
        patch.apply(&mut record);
        self.write_record(record)
    }

    /// The stored record if it is trustworthy. An untrustworthy record is
    /// cleared as a side effect.
    pub fn load(&self) -> Option<ActiveRideRecord> {
        let _guard = self.writer.lock();
        self.read_valid(self.clock.now())
    }

    /// Remove the stored record. Idempotent.
    pub fn clear(&self) {
        let _guard = self.writer.lock();
        self.remove();
    }

    fn read_valid(&self, now: DateTime<Utc>) -> Option<ActiveRideRecord> {
        let raw = match self.slot.read() {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(%error, "failed to read active ride record");
                return None;
            }
        };
        let record = match serde_json::from_str::<ActiveRideRecord>(&raw) {
            Ok(record) => record,
            Err(error) => {
                warn!(%error, "discarding corrupt active ride record");
                self.remove();
                return None;
            }
        };
        match record.validate(now, self.max_age) {
            Ok(()) => Some(record),
            Err(reason) => {
                info!(?reason, ride_id = ?record.ride_id, "discarding active ride record");
                self.remove();
                None
            }
        }
    }

    fn write_record(&self, record: ActiveRideRecord) -> Option<ActiveRideRecord> {
        if let Err(reason) = record.check_identifiers() {
            warn!(?reason, "refusing to persist active ride record");
            return None;
        }
        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(error) => {
                warn!(%error, "failed to serialize active ride record");
                return None;
            }
        };
        match self.slot.write(&json) {
            Ok(()) => {
                debug!(ride_id = ?record.ride_id, request_id = ?record.request_id, status = ?record.status, "active ride saved");
                Some(record)
            }
            Err(error) => {
                warn!(%error, "failed to write active ride record");
                None
            }
        }
    }

    fn remove(&self) {
        if let Err(error) = self.slot.remove() {
            warn!(%error, "failed to clear active ride record");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
