//! Realtime error types.

use thiserror::Error;

/// Errors from the broker session and subscription registry.
///
/// `Clone` so that every awaiter of a shared `connect()` observes the same
/// outcome.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RealtimeError {
    /// An operation that needs a live session was called while disconnected.
    #[error("not connected to the broker")]
    NotConnected,

    /// The transport to one endpoint failed.
    #[error("transport error on {endpoint}: {message}")]
    Transport {
        /// Endpoint URL.
        endpoint: String,
        /// What went wrong.
        message: String,
    },

    /// The broker answered with something other than the expected frame.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Every endpoint candidate failed.
    #[error("all broker endpoints failed: {}", .failures.join("; "))]
    Exhausted {
        /// One entry per failed candidate, in the order tried.
        failures: Vec<String>,
    },

    /// The overall connect budget elapsed, or the session went silent.
    #[error("timed out after {timeout_ms}ms")]
    Timeout {
        /// How long we waited.
        timeout_ms: u64,
    },

    /// No usable credential could be obtained.
    #[error("credential unavailable: {0}")]
    Credential(String),

    /// The session was closed before the operation completed.
    #[error("session closed")]
    Closed,
}

impl RealtimeError {
    /// Build a transport error for `endpoint`.
    pub fn transport(endpoint: &str, message: impl Into<String>) -> Self {
        Self::Transport {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
