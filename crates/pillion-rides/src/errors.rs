//! Error types for the ride coordination layer.

use pillion_realtime::RealtimeError;
use thiserror::Error;

use crate::offer::OfferKey;

/// Failure of a backend confirmation API call.
///
/// `Clone` so a failed accept can be surfaced to the UI and logged without
/// giving up ownership.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The request never produced a response.
    #[error("request failed: {0}")]
    Network(String),

    /// The backend rejected the call.
    #[error("backend returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The credential was refused.
    #[error("unauthorized")]
    Unauthorized,

    /// The response could not be understood.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// The offer lacks the identifier this call needs.
    #[error("missing identifier: {0}")]
    MissingIdentifier(&'static str),
}

/// Errors from offer resolution.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OfferError {
    /// No visible or recently resolved offer has this key.
    #[error("unknown offer {0}")]
    UnknownOffer(OfferKey),

    /// The confirmation call failed; the offer stays open for retry.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Durable slot failures. Logged by the cache, never surfaced.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The stored value is not valid JSON for the record.
    #[error("stored record is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from the coordinator's explicit lifecycle actions.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Connecting or subscribing failed.
    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    /// A backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// There is no active request to act on.
    #[error("no active request")]
    NoActiveRequest,

    /// The action needs a role, but the coordinator is offline.
    #[error("coordinator is offline")]
    Offline,
}
