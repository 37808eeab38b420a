//! Typed inbound frames.
//!
//! Each broker topic delivers JSON event frames. The decoders here run every
//! frame through [`Payload`] once and produce a typed value; nothing
//! downstream looks at field spellings again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DecodeError;
use crate::ids::{OfferId, RequestId, RideId};
use crate::normalize::Payload;

// ─────────────────────────────────────────────────────────────────────────────
// Candidate field paths
// ─────────────────────────────────────────────────────────────────────────────

const STATUS_FIELDS: &[&str] = &["status", "type", "eventType", "event"];
const KIND_FIELDS: &[&str] = &["offerType", "requestType", "type", "eventType"];
const OFFER_ID_FIELDS: &[&str] = &["offerId", "offer.id"];
const REQUEST_ID_FIELDS: &[&str] = &[
    "requestId",
    "rideRequestId",
    "joinRequestId",
    "request.id",
    "rideRequest.id",
];
const RIDE_ID_FIELDS: &[&str] = &["rideId", "sharedRideId", "ride.id", "sharedRide.id"];
const FARE_FIELDS: &[&str] = &[
    "totalFare",
    "fare",
    "estimatedFare",
    "fareAmount",
    "price",
    "amount",
];
const EXPIRY_FIELDS: &[&str] = &["expiresAt", "expiryTime", "expiredAt", "expireAt", "deadline"];

const PICKUP_NAME_FIELDS: &[&str] = &[
    "pickupLocationName",
    "pickupAddress",
    "pickupLocation.name",
    "pickupLocation.address",
    "pickup.name",
    "pickup.address",
    "startLocationName",
    "startAddress",
    "fromLocation",
];
const PICKUP_LAT_FIELDS: &[&str] = &[
    "pickupLatitude",
    "pickupLat",
    "pickupLocation.latitude",
    "pickupLocation.lat",
    "pickup.latitude",
    "pickup.lat",
];
const PICKUP_LNG_FIELDS: &[&str] = &[
    "pickupLongitude",
    "pickupLng",
    "pickupLocation.longitude",
    "pickupLocation.lng",
    "pickup.longitude",
    "pickup.lng",
];
const DROPOFF_NAME_FIELDS: &[&str] = &[
    "dropoffLocationName",
    "dropoffAddress",
    "dropoffLocation.name",
    "dropoffLocation.address",
    "dropoff.name",
    "dropoff.address",
    "destinationName",
    "destination",
    "endLocationName",
    "toLocation",
];
const DROPOFF_LAT_FIELDS: &[&str] = &[
    "dropoffLatitude",
    "dropoffLat",
    "dropoffLocation.latitude",
    "dropoffLocation.lat",
    "dropoff.latitude",
    "dropoff.lat",
];
const DROPOFF_LNG_FIELDS: &[&str] = &[
    "dropoffLongitude",
    "dropoffLng",
    "dropoffLocation.longitude",
    "dropoffLocation.lng",
    "dropoff.longitude",
    "dropoff.lng",
];

const RIDER_NAME_FIELDS: &[&str] = &[
    "riderName",
    "passengerName",
    "customerName",
    "rider.fullName",
    "rider.name",
    "passenger.fullName",
    "passenger.name",
];
const RIDER_ID_FIELDS: &[&str] = &["riderId", "passengerId", "rider.id", "passenger.id"];
const RIDER_PHONE_FIELDS: &[&str] = &["riderPhone", "passengerPhone", "rider.phone", "passenger.phone"];

const DRIVER_NAME_FIELDS: &[&str] = &["driverName", "driver.fullName", "driver.name"];
const DRIVER_ID_FIELDS: &[&str] = &["driverId", "driver.id"];
const DRIVER_PHONE_FIELDS: &[&str] = &["driverPhone", "driver.phone", "driver.phoneNumber"];
const PLATE_FIELDS: &[&str] = &[
    "vehiclePlate",
    "plateNumber",
    "vehicle.plateNumber",
    "driver.vehiclePlate",
];

/// Statuses that withdraw a previously delivered offer.
const CANCELLATION_STATUSES: &[&str] = &[
    "CANCELLED",
    "CANCELED",
    "REQUEST_CANCELLED",
    "OFFER_CANCELLED",
    "JOIN_REQUEST_CANCELLED",
    "WITHDRAWN",
];

// ─────────────────────────────────────────────────────────────────────────────
// Shared value types
// ─────────────────────────────────────────────────────────────────────────────

/// Which side of a ride the local user is on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The motorbike driver.
    Driver,
    /// The passenger.
    Rider,
}

impl Role {
    /// Wire form used in backend queries.
    pub fn as_query(self) -> &'static str {
        match self {
            Self::Driver => "DRIVER",
            Self::Rider => "RIDER",
        }
    }
}

/// The flavour of an offer. All kinds share presentation and countdown
/// semantics; they differ in the confirmation call and post-accept target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferKind {
    /// Matching service assigned this rider to this driver.
    DirectAssignment,
    /// Open request visible to every eligible driver.
    OpenBroadcast,
    /// A rider asks to join an already scheduled or ongoing shared ride.
    JoinRequest,
}

/// A pickup or dropoff descriptor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Human-readable name or address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Latitude in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Location {
    /// Whether nothing at all is known about this location.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.latitude.is_none() && self.longitude.is_none()
    }
}

/// The other party of a ride.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counterpart {
    /// Backend user ID.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Contact phone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Vehicle plate (drivers only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_plate: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Field groups
// ─────────────────────────────────────────────────────────────────────────────

fn pickup(p: &Payload<'_>) -> Location {
    Location {
        name: p.text(PICKUP_NAME_FIELDS),
        latitude: p.number(PICKUP_LAT_FIELDS),
        longitude: p.number(PICKUP_LNG_FIELDS),
    }
}

fn dropoff(p: &Payload<'_>) -> Location {
    Location {
        name: p.text(DROPOFF_NAME_FIELDS),
        latitude: p.number(DROPOFF_LAT_FIELDS),
        longitude: p.number(DROPOFF_LNG_FIELDS),
    }
}

fn rider(p: &Payload<'_>) -> Counterpart {
    Counterpart {
        id: p.id(RIDER_ID_FIELDS),
        name: p.text(RIDER_NAME_FIELDS),
        phone: p.text(RIDER_PHONE_FIELDS),
        vehicle_plate: None,
    }
}

fn driver(p: &Payload<'_>) -> Counterpart {
    Counterpart {
        id: p.id(DRIVER_ID_FIELDS),
        name: p.text(DRIVER_NAME_FIELDS),
        phone: p.text(DRIVER_PHONE_FIELDS),
        vehicle_plate: p.text(PLATE_FIELDS),
    }
}

fn parse_body(body: &str) -> Result<Value, DecodeError> {
    Ok(serde_json::from_str(body)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Offer frames (driver queue)
// ─────────────────────────────────────────────────────────────────────────────

/// A ride offer or join request delivered to a driver.
#[derive(Clone, Debug, PartialEq)]
pub struct OfferFrame {
    /// Upper-cased status/type discriminator.
    pub status: Option<String>,
    /// Offer flavour.
    pub kind: OfferKind,
    /// Offer ID assigned by the matching service.
    pub offer_id: Option<OfferId>,
    /// Ride request (or join request) ID.
    pub request_id: Option<RequestId>,
    /// Ride ID (the shared ride for join requests).
    pub ride_id: Option<RideId>,
    /// Normalised fare, `0.0` when unparseable.
    pub fare: f64,
    /// Pickup descriptor.
    pub pickup: Location,
    /// Dropoff descriptor.
    pub dropoff: Location,
    /// Decision deadline.
    pub expires_at: Option<DateTime<Utc>>,
    /// The requesting rider.
    pub rider: Counterpart,
}

impl OfferFrame {
    /// Decode a JSON body.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        Self::from_value(&parse_body(body)?)
    }

    /// Decode an already parsed JSON value.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let p = Payload::new(value)?;
        let frame = Self {
            status: p.status(STATUS_FIELDS),
            kind: offer_kind(&p),
            offer_id: p.id(OFFER_ID_FIELDS).map(OfferId::from),
            request_id: p.id(REQUEST_ID_FIELDS).map(RequestId::from),
            ride_id: p.id(RIDE_ID_FIELDS).map(RideId::from),
            fare: p.fare(FARE_FIELDS),
            pickup: pickup(&p),
            dropoff: dropoff(&p),
            expires_at: p.timestamp(EXPIRY_FIELDS),
            rider: rider(&p),
        };
        if frame.offer_id.is_none() && frame.request_id.is_none() && frame.ride_id.is_none() {
            return Err(DecodeError::MissingField("offerId|requestId|rideId"));
        }
        Ok(frame)
    }

    /// Whether this frame withdraws an earlier offer rather than making one.
    pub fn is_cancellation(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| CANCELLATION_STATUSES.contains(&s))
    }
}

fn offer_kind(p: &Payload<'_>) -> OfferKind {
    let marker = p.status(KIND_FIELDS).unwrap_or_default();
    if marker.contains("JOIN") || p.get("joinRequestId").is_some() {
        OfferKind::JoinRequest
    } else if marker.contains("BROADCAST")
        || marker.contains("OPEN")
        || p.flag(&["isBroadcast", "broadcast"]) == Some(true)
    {
        OfferKind::OpenBroadcast
    } else {
        OfferKind::DirectAssignment
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Matching frames (rider queue)
// ─────────────────────────────────────────────────────────────────────────────

/// A matching status update delivered to a rider.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchingFrame {
    /// Upper-cased status discriminator (required).
    pub status: String,
    /// The rider's request ID.
    pub request_id: Option<RequestId>,
    /// The matched ride, once known.
    pub ride_id: Option<RideId>,
    /// The matched driver.
    pub driver: Counterpart,
    /// Normalised fare.
    pub fare: f64,
    /// Pickup descriptor.
    pub pickup: Location,
    /// Dropoff descriptor.
    pub dropoff: Location,
}

impl MatchingFrame {
    /// Decode a JSON body.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        Self::from_value(&parse_body(body)?)
    }

    /// Decode an already parsed JSON value.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let p = Payload::new(value)?;
        Ok(Self {
            status: p
                .status(STATUS_FIELDS)
                .ok_or(DecodeError::MissingField("status"))?,
            request_id: p.id(REQUEST_ID_FIELDS).map(RequestId::from),
            ride_id: p.id(RIDE_ID_FIELDS).map(RideId::from),
            driver: driver(&p),
            fare: p.fare(FARE_FIELDS),
            pickup: pickup(&p),
            dropoff: dropoff(&p),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tracking frames (per-ride topic)
// ─────────────────────────────────────────────────────────────────────────────

/// A live update for one ride.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackingFrame {
    /// Ride this update belongs to.
    pub ride_id: Option<RideId>,
    /// Ride status, if the update carries one.
    pub status: Option<String>,
    /// Driver position.
    pub position: Option<Location>,
    /// Estimated minutes to the next waypoint.
    pub eta_minutes: Option<f64>,
}

impl TrackingFrame {
    /// Decode a JSON body.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let value = parse_body(body)?;
        let p = Payload::new(&value)?;
        let latitude = p.number(&["latitude", "lat", "location.latitude", "location.lat"]);
        let longitude = p.number(&["longitude", "lng", "location.longitude", "location.lng"]);
        let position = (latitude.is_some() && longitude.is_some()).then(|| Location {
            name: None,
            latitude,
            longitude,
        });
        Ok(Self {
            ride_id: p.id(RIDE_ID_FIELDS).map(RideId::from),
            status: p.status(&["rideStatus", "status"]),
            position,
            eta_minutes: p.number(&["etaMinutes", "eta"]),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Notification frames
// ─────────────────────────────────────────────────────────────────────────────

/// A user notification.
#[derive(Clone, Debug, PartialEq)]
pub struct NotificationFrame {
    /// Notification type discriminator.
    pub kind: Option<String>,
    /// Short title.
    pub title: Option<String>,
    /// Body text.
    pub message: Option<String>,
    /// Related ride, if any.
    pub ride_id: Option<RideId>,
    /// Related request, if any.
    pub request_id: Option<RequestId>,
    /// The complete payload for consumers that need more.
    pub raw: Value,
}

impl NotificationFrame {
    /// Decode a JSON body.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let value = parse_body(body)?;
        let p = Payload::new(&value)?;
        Ok(Self {
            kind: p.status(&["type", "notificationType", "category"]),
            title: p.text(&["title", "subject"]),
            message: p.text(&["message", "body", "content"]),
            ride_id: p.id(RIDE_ID_FIELDS).map(RideId::from),
            request_id: p.id(REQUEST_ID_FIELDS).map(RequestId::from),
            raw: value,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend ride summaries
// ─────────────────────────────────────────────────────────────────────────────

/// One in-flight request as reported by the backend query endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct RideSummary {
    /// Request ID.
    pub request_id: Option<RequestId>,
    /// Ride ID.
    pub ride_id: Option<RideId>,
    /// Upper-cased status.
    pub status: Option<String>,
    /// The other party (driver for riders, rider for drivers).
    pub counterpart: Counterpart,
    /// Pickup descriptor.
    pub pickup: Location,
    /// Dropoff descriptor.
    pub dropoff: Location,
    /// Normalised fare.
    pub fare: f64,
}

impl RideSummary {
    /// Decode one list item. `role` selects which party is the counterpart.
    pub fn from_value(value: &Value, role: Role) -> Result<Self, DecodeError> {
        let p = Payload::new(value)?;
        let request_id = p
            .id(REQUEST_ID_FIELDS)
            .or_else(|| p.id(&["id"]))
            .map(RequestId::from);
        Ok(Self {
            request_id,
            ride_id: p.id(RIDE_ID_FIELDS).map(RideId::from),
            status: p.status(&["status", "requestStatus", "rideStatus"]),
            counterpart: match role {
                Role::Driver => rider(&p),
                Role::Rider => driver(&p),
            },
            pickup: pickup(&p),
            dropoff: dropoff(&p),
            fare: p.fare(FARE_FIELDS),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn matching_frame_normalises_string_fare_and_numeric_ids() {
        let body = r#"{"status":"ACCEPTED","rideId":42,"requestId":7,"driverName":"A","totalFare":"15000"}"#;
        let frame = MatchingFrame::decode(body).unwrap();
        assert_eq!(frame.status, "ACCEPTED");
        assert_eq!(frame.ride_id, Some(RideId::from("42")));
        assert_eq!(frame.request_id, Some(RequestId::from("7")));
        assert_eq!(frame.driver.name.as_deref(), Some("A"));
        assert!((frame.fare - 15000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn matching_frame_requires_status() {
        assert_matches!(
            MatchingFrame::decode(r#"{"rideId":1}"#),
            Err(DecodeError::MissingField("status"))
        );
    }

    #[test]
    fn offer_frame_requires_an_identifier() {
        assert_matches!(
            OfferFrame::decode(r#"{"status":"NEW","requestId":"undefined"}"#),
            Err(DecodeError::MissingField(_))
        );
    }

    #[test]
    fn offer_frame_reads_locations_through_fallbacks() {
        let body = json!({
            "requestId": 11,
            "pickupLocationName": "N/A",
            "pickupLocation": {"name": "Library", "latitude": 10.1, "longitude": 106.7},
            "destination": "Dorm B",
            "fare": {"amount": 22000},
            "expiresAt": "2025-03-01T10:00:30Z",
            "passengerName": "Lan"
        });
        let frame = OfferFrame::from_value(&body).unwrap();
        assert_eq!(frame.pickup.name.as_deref(), Some("Library"));
        assert_eq!(frame.pickup.latitude, Some(10.1));
        assert_eq!(frame.dropoff.name.as_deref(), Some("Dorm B"));
        assert!((frame.fare - 22000.0).abs() < f64::EPSILON);
        assert!(frame.expires_at.is_some());
        assert_eq!(frame.rider.name.as_deref(), Some("Lan"));
        assert_eq!(frame.kind, OfferKind::DirectAssignment);
    }

    #[test]
    fn offer_kind_inference() {
        let join = OfferFrame::from_value(&json!({"joinRequestId": 3, "rideId": 9})).unwrap();
        assert_eq!(join.kind, OfferKind::JoinRequest);
        assert_eq!(join.request_id, Some(RequestId::from("3")));

        let broadcast =
            OfferFrame::from_value(&json!({"requestId": 4, "type": "BROADCAST_REQUEST"})).unwrap();
        assert_eq!(broadcast.kind, OfferKind::OpenBroadcast);

        let flagged =
            OfferFrame::from_value(&json!({"requestId": 5, "isBroadcast": true})).unwrap();
        assert_eq!(flagged.kind, OfferKind::OpenBroadcast);
    }

    #[test]
    fn cancellation_statuses() {
        let f = OfferFrame::from_value(&json!({"requestId": 1, "status": "cancelled"})).unwrap();
        assert!(f.is_cancellation());
        let f = OfferFrame::from_value(&json!({"requestId": 1, "status": "NEW_REQUEST"})).unwrap();
        assert!(!f.is_cancellation());
    }

    #[test]
    fn tracking_frame_position_needs_both_coordinates() {
        let f = TrackingFrame::decode(r#"{"rideId":"9","lat":10.0}"#).unwrap();
        assert!(f.position.is_none());
        let f = TrackingFrame::decode(r#"{"rideId":"9","lat":10.0,"lng":106.0,"rideStatus":"ongoing"}"#)
            .unwrap();
        assert!(f.position.is_some());
        assert_eq!(f.status.as_deref(), Some("ONGOING"));
    }

    #[test]
    fn notification_keeps_raw_payload() {
        let f = NotificationFrame::decode(r#"{"type":"promo","title":"Hi","extra":1}"#).unwrap();
        assert_eq!(f.kind.as_deref(), Some("PROMO"));
        assert_eq!(f.raw["extra"], 1);
    }

    #[test]
    fn ride_summary_counterpart_depends_on_role() {
        let v = json!({"id": 8, "rideId": 2, "status": "ongoing", "driverName": "D", "riderName": "R"});
        let as_rider = RideSummary::from_value(&v, Role::Rider).unwrap();
        let as_driver = RideSummary::from_value(&v, Role::Driver).unwrap();
        assert_eq!(as_rider.counterpart.name.as_deref(), Some("D"));
        assert_eq!(as_driver.counterpart.name.as_deref(), Some("R"));
        assert_eq!(as_rider.request_id, Some(RequestId::from("8")));
        assert_eq!(as_rider.status.as_deref(), Some("ONGOING"));
    }

    #[test]
    fn non_json_body_is_a_decode_error() {
        assert_matches!(OfferFrame::decode("hello"), Err(DecodeError::Json(_)));
        assert_matches!(
            NotificationFrame::decode("[1]"),
            Err(DecodeError::NotAnObject("array"))
        );
    }
}
