//! Backend confirmation API.
//!
//! The broker only pushes; every decision (accept, reject, cancel) and the
//! authoritative "what am I doing right now" query goes through a
//! [`RideBackend`]. Production uses [`HttpRideBackend`]; tests substitute
//! mocks.

mod http;

pub use http::HttpRideBackend;

use async_trait::async_trait;
use pillion_core::{RequestId, RideId, RideSummary, Role};

use crate::errors::BackendError;
use crate::offer::Offer;

/// What the backend returned for a successful accept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcceptReceipt {
    /// Ride the driver is now bound to, when the backend reports it.
    pub ride_id: Option<RideId>,
    /// Request that was accepted.
    pub request_id: Option<RequestId>,
    /// Resulting status (upper-case).
    pub status: Option<String>,
}

/// One page of the in-flight request query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InFlightQuery {
    /// Perspective of the query.
    pub role: Role,
    /// Status filter (e.g. `ONGOING`).
    pub status: String,
    /// Zero-based page.
    pub page: u32,
    /// Page size.
    pub size: u32,
}

impl InFlightQuery {
    /// First page for `role` and `status`.
    pub fn first_page(role: Role, status: impl Into<String>, size: u32) -> Self {
        Self {
            role,
            status: status.into(),
            page: 0,
            size,
        }
    }
}

/// Ride backend operations used by the coordination layer.
#[async_trait]
pub trait RideBackend: Send + Sync {
    /// Accept a direct assignment.
    async fn accept_direct(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError>;

    /// Claim an open broadcast request.
    async fn accept_broadcast(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError>;

    /// Approve a join request on a shared ride.
    async fn accept_join(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError>;

    /// Decline an offer.
    async fn reject_offer(&self, offer: &Offer, reason: &str) -> Result<(), BackendError>;

    /// Cancel the rider's own request.
    async fn cancel_request(&self, request_id: &RequestId) -> Result<(), BackendError>;

    /// In-flight requests matching `query`.
    async fn in_flight_requests(
        &self,
        query: &InFlightQuery,
    ) -> Result<Vec<RideSummary>, BackendError>;
}

#[cfg(test)]
mockall::mock! {
    pub Backend {}

    #[async_trait]
    impl RideBackend for Backend {
        async fn accept_direct(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError>;
        async fn accept_broadcast(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError>;
        async fn accept_join(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError>;
        async fn reject_offer(&self, offer: &Offer, reason: &str) -> Result<(), BackendError>;
        async fn cancel_request(&self, request_id: &RequestId) -> Result<(), BackendError>;
        async fn in_flight_requests(&self, query: &InFlightQuery) -> Result<Vec<RideSummary>, BackendError>;
    }
}
