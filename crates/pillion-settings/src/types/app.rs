//! Backend API, offer, cache and logging settings.

use serde::{Deserialize, Serialize};

/// Backend confirmation API settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL of the REST backend.
    pub base_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Page size for in-flight request queries.
    pub page_size: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.pillion.app".to_string(),
            request_timeout_ms: 15_000,
            page_size: 10,
        }
    }
}

/// Offer presentation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OfferSettings {
    /// Countdown tick resolution in milliseconds.
    pub tick_ms: u64,
    /// Reason sent with a reject when the UI does not supply one.
    pub reject_reason: String,
}

impl Default for OfferSettings {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            reject_reason: "Driver declined".to_string(),
        }
    }
}

/// Active ride cache settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// File holding the serialized active ride record.
    pub path: String,
    /// Records older than this are discarded on load.
    pub max_age_hours: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: "active_ride.json".to_string(),
            max_age_hours: 24,
        }
    }
}

/// Logging output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`trace`..`error`), overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
