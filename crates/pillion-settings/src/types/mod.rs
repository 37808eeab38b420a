//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file may specify any subset of fields.

mod app;
mod broker;

pub use app::*;
pub use broker::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "broker": { "endpoints": ["wss://rt.example/ws"] },
///   "cache": { "maxAgeHours": 12 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PillionSettings {
    /// Realtime broker connection.
    pub broker: BrokerSettings,
    /// Backend confirmation API.
    pub api: ApiSettings,
    /// Offer presentation.
    pub offers: OfferSettings,
    /// Active ride cache.
    pub cache: CacheSettings,
    /// Logging output.
    pub logging: LoggingSettings,
}
