//! Decode error types.

use thiserror::Error;

/// Failure to turn an inbound broker body into a typed frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The body is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(String),

    /// The body is valid JSON but not an object.
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    /// A field required by this frame kind is missing or a sentinel value.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
