//! Well-known broker destinations and the events they carry.

use std::fmt;

use pillion_core::{
    DecodeError, MatchingFrame, NotificationFrame, OfferFrame, RideId, SubscriptionKey,
    TrackingFrame,
};

/// A logical topic the session can multiplex.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Offers and join requests addressed to the current driver.
    DriverOffers,
    /// Matching progress for the current rider's request.
    RiderMatching,
    /// User notifications.
    Notifications,
    /// Live updates for one ride.
    RideTracking(RideId),
}

impl Topic {
    /// Broker destination for this topic.
    pub fn destination(&self) -> String {
        match self {
            Self::DriverOffers => "/user/queue/driver-offers".to_string(),
            Self::RiderMatching => "/user/queue/rider-matching".to_string(),
            Self::Notifications => "/user/queue/notifications".to_string(),
            Self::RideTracking(ride_id) => format!("/topic/rides/{ride_id}/tracking"),
        }
    }

    /// Deterministic key for topics that must never be subscribed twice.
    ///
    /// Per-ride tracking is keyed by ride so re-subscribing replaces the
    /// earlier handler.
    pub fn natural_key(&self) -> Option<SubscriptionKey> {
        match self {
            Self::RideTracking(ride_id) => Some(SubscriptionKey::new(format!("tracking:{ride_id}"))),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DriverOffers => f.write_str("driver-offers"),
            Self::RiderMatching => f.write_str("rider-matching"),
            Self::Notifications => f.write_str("notifications"),
            Self::RideTracking(id) => write!(f, "ride-tracking({id})"),
        }
    }
}

/// A typed event decoded from a `MESSAGE` body.
#[derive(Clone, Debug, PartialEq)]
pub enum BrokerEvent {
    /// From [`Topic::DriverOffers`].
    Offer(OfferFrame),
    /// From [`Topic::RiderMatching`].
    Matching(MatchingFrame),
    /// From [`Topic::Notifications`].
    Notification(NotificationFrame),
    /// From [`Topic::RideTracking`].
    Tracking(TrackingFrame),
}

impl BrokerEvent {
    /// Decode `body` with the decoder that belongs to `topic`.
    pub fn decode(topic: &Topic, body: &str) -> Result<Self, DecodeError> {
        Ok(match topic {
            Topic::DriverOffers => Self::Offer(OfferFrame::decode(body)?),
            Topic::RiderMatching => Self::Matching(MatchingFrame::decode(body)?),
            Topic::Notifications => Self::Notification(NotificationFrame::decode(body)?),
            Topic::RideTracking(_) => Self::Tracking(TrackingFrame::decode(body)?),
        })
    }
}
