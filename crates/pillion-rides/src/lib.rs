//! # pillion-rides
//!
//! Ride-level coordination on top of the broker session.
//!
//! - [`controller::OfferController`]: offer presentation, per-offer
//!   countdowns and first-wins resolution
//! - [`matching::MatchTracker`]: the rider's side of matching
//! - [`cache::ActiveRideCache`]: the durable "what am I doing right now"
//!   record, validated on every load
//! - [`reconcile::Reconciler`]: backend-authoritative cache repair
//! - [`coordinator::RideCoordinator`]: explicit online/offline/resume
//!   lifecycle wiring all of the above to a
//!   [`pillion_realtime::ConnectionManager`]

#![deny(unsafe_code)]

pub mod backend;
pub mod cache;
pub mod controller;
pub mod coordinator;
pub mod countdown;
pub mod errors;
pub mod matching;
pub mod offer;
pub mod reconcile;
pub mod slot;
pub mod tracking;

pub use backend::{AcceptReceipt, HttpRideBackend, InFlightQuery, RideBackend};
pub use cache::{ActiveRideCache, ActiveRidePatch, ActiveRideRecord};
pub use controller::{AcceptHooks, NavigationTarget, OfferController, OfferEvent, Resolution};
pub use coordinator::{CoordinatorParts, RideCoordinator};
pub use errors::{BackendError, CoordinatorError, OfferError, StorageError};
pub use matching::{MatchState, MatchTracker};
pub use offer::{Offer, OfferKey, OfferState};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use slot::{DurableSlot, FileSlot, MemorySlot};
pub use tracking::{RideTracker, TrackingOutcome};
