//! Offer model.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pillion_core::{Counterpart, Location, OfferFrame, OfferId, OfferKind, RequestId, RideId};

/// Where an offer is in its lifecycle. The last five states are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OfferState {
    /// Decoded from a frame, not yet visible.
    Received,
    /// Visible to the decision-maker.
    Presented,
    /// Confirmed by the backend after an explicit accept.
    Accepted,
    /// Declined by the decision-maker.
    Rejected,
    /// The countdown reached zero.
    Expired,
    /// Replaced by a newer frame for the same identifier.
    Superseded,
    /// Withdrawn by a cancellation frame.
    Cancelled,
}

impl OfferState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Received | Self::Presented)
    }
}

impl fmt::Display for OfferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Presented => "presented",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Superseded => "superseded",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One identifier an offer can be addressed by.
///
/// Request IDs are scoped by kind because ride requests and join requests
/// are numbered independently by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OfferKey {
    /// Matching-service offer ID.
    Offer(OfferId),
    /// Ride request ID (direct or broadcast).
    Request(RequestId),
    /// Join request ID.
    JoinRequest(RequestId),
    /// Ride ID, used only when nothing finer is known.
    Ride(RideId),
}

impl fmt::Display for OfferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer(id) => write!(f, "offer:{id}"),
            Self::Request(id) => write!(f, "request:{id}"),
            Self::JoinRequest(id) => write!(f, "join:{id}"),
            Self::Ride(id) => write!(f, "ride:{id}"),
        }
    }
}

/// A normalized, time-bounded ride offer or join request.
#[derive(Clone, Debug, PartialEq)]
pub struct Offer {
    /// Offer flavour.
    pub kind: OfferKind,
    /// Matching-service offer ID.
    pub offer_id: Option<OfferId>,
    /// Ride request or join request ID.
    pub request_id: Option<RequestId>,
    /// Ride ID (the shared ride for join requests).
    pub ride_id: Option<RideId>,
    /// Normalized fare.
    pub fare: f64,
    /// Pickup descriptor.
    pub pickup: Location,
    /// Dropoff descriptor.
    pub dropoff: Location,
    /// Decision deadline.
    pub expires_at: Option<DateTime<Utc>>,
    /// The requesting rider.
    pub rider: Counterpart,
    /// When the frame was received.
    pub received_at: DateTime<Utc>,
}

impl Offer {
    /// Build from a decoded frame.
    pub fn from_frame(frame: OfferFrame, received_at: DateTime<Utc>) -> Self {
        Self {
            kind: frame.kind,
            offer_id: frame.offer_id,
            request_id: frame.request_id,
            ride_id: frame.ride_id,
            fare: frame.fare,
            pickup: frame.pickup,
            dropoff: frame.dropoff,
            expires_at: frame.expires_at,
            rider: frame.rider,
            received_at,
        }
    }

    /// Every key this offer answers to, most specific first.
    pub fn keys(&self) -> Vec<OfferKey> {
        identity_keys(
            self.kind,
            self.offer_id.as_ref(),
            self.request_id.as_ref(),
            self.ride_id.as_ref(),
        )
    }

    /// The primary key (most specific identifier).
    pub fn key(&self) -> OfferKey {
        self.keys()
            .into_iter()
            .next()
            .unwrap_or_else(|| OfferKey::Ride(RideId::new("")))
    }

    /// Whether `key` addresses this offer.
    pub fn answers_to(&self, key: &OfferKey) -> bool {
        self.keys().iter().any(|k| k == key)
    }

    /// Whether two offers share any identifier.
    pub fn overlaps(&self, other: &Self) -> bool {
        let mine = self.keys();
        other.keys().iter().any(|k| mine.contains(k))
    }

    /// Time left before the deadline, clamped at zero. `None` without a
    /// deadline.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let deadline = self.expires_at?;
        Some((deadline - now).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Keys for a frame that has not become an [`Offer`] yet.
pub fn frame_keys(frame: &OfferFrame) -> Vec<OfferKey> {
    identity_keys(
        frame.kind,
        frame.offer_id.as_ref(),
        frame.request_id.as_ref(),
        frame.ride_id.as_ref(),
    )
}

fn identity_keys(
    kind: OfferKind,
    offer_id: Option<&OfferId>,
    request_id: Option<&RequestId>,
    ride_id: Option<&RideId>,
) -> Vec<OfferKey> {
    let mut keys = Vec::with_capacity(2);
    if let Some(id) = offer_id {
        keys.push(OfferKey::Offer(id.clone()));
    }
    if let Some(id) = request_id {
        keys.push(match kind {
            OfferKind::JoinRequest => OfferKey::JoinRequest(id.clone()),
            OfferKind::DirectAssignment | OfferKind::OpenBroadcast => OfferKey::Request(id.clone()),
        });
    }
    // Several join requests can target one shared ride, so the ride only
    // identifies a join request when nothing else does.
    let ride_identifies = request_id.is_none() && (kind != OfferKind::JoinRequest || keys.is_empty());
    if let Some(id) = ride_id.filter(|_| ride_identifies) {
        keys.push(OfferKey::Ride(id.clone()));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn offer(value: serde_json::Value) -> Offer {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        Offer::from_frame(OfferFrame::from_value(&value).unwrap(), now)
    }

    #[test]
    fn terminal_states() {
        assert!(!OfferState::Received.is_terminal());
        assert!(!OfferState::Presented.is_terminal());
        for s in [
            OfferState::Accepted,
            OfferState::Rejected,
            OfferState::Expired,
            OfferState::Superseded,
            OfferState::Cancelled,
        ] {
            assert!(s.is_terminal(), "{s}");
        }
    }

    #[test]
    fn keys_prefer_specific_identifiers() {
        let o = offer(json!({"offerId": "o1", "requestId": 7, "rideId": 42}));
        assert_eq!(
            o.keys(),
            vec![
                OfferKey::Offer(OfferId::from("o1")),
                OfferKey::Request(RequestId::from("7"))
            ]
        );
        assert_eq!(o.key(), OfferKey::Offer(OfferId::from("o1")));
    }

    #[test]
    fn ride_key_only_without_request() {
        let o = offer(json!({"rideId": 42}));
        assert_eq!(o.keys(), vec![OfferKey::Ride(RideId::from("42"))]);
    }

    #[test]
    fn join_requests_on_one_ride_do_not_overlap() {
        let a = offer(json!({"joinRequestId": 1, "rideId": 42}));
        let b = offer(json!({"joinRequestId": 2, "rideId": 42}));
        assert!(!a.overlaps(&b));
        assert_eq!(a.key(), OfferKey::JoinRequest(RequestId::from("1")));
    }

    #[test]
    fn overlap_by_any_shared_key() {
        let a = offer(json!({"offerId": "o1", "requestId": 7}));
        let b = offer(json!({"requestId": 7, "fare": 100}));
        assert!(a.overlaps(&b));
        assert!(b.answers_to(&OfferKey::Request(RequestId::from("7"))));
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let o = offer(json!({"requestId": 1, "expiresAt": "2025-03-01T10:00:05Z"}));
        let now = o.received_at;
        assert_eq!(o.remaining(now), Some(Duration::from_secs(5)));
        assert_eq!(
            o.remaining(now + chrono::Duration::seconds(10)),
            Some(Duration::ZERO)
        );
        assert_eq!(offer(json!({"requestId": 1})).remaining(now), None);
    }
}
