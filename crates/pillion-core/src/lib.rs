//! # pillion-core
//!
//! Shared vocabulary for the Pillion ride-matching coordination layer.
//!
//! - **Branded IDs**: `RideId`, `RequestId`, `OfferId`, `SubscriptionKey`
//! - **Clock**: [`clock::Clock`] seam with system and manual implementations
//! - **Normalization**: [`normalize::Payload`], the single boundary where
//!   heterogeneous JSON shapes (fare as number/string/object, multiple
//!   spellings of the same field) become typed values
//! - **Frames**: typed inbound broker frames built on top of the normalizer
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod frames;
pub mod ids;
pub mod logging;
pub mod normalize;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::DecodeError;
pub use frames::{
    Counterpart, Location, MatchingFrame, NotificationFrame, OfferFrame, OfferKind, RideSummary,
    Role, TrackingFrame,
};
pub use ids::{OfferId, RequestId, RideId, SubscriptionKey};
