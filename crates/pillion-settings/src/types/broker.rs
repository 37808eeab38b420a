//! Message broker connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How to reach the realtime broker.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Candidate endpoint URLs, highest priority first.
    pub endpoints: Vec<String>,
    /// Overall budget for one `connect()` across all candidates.
    pub connect_timeout_ms: u64,
    /// Interval at which heart-beats are sent and checked.
    pub heartbeat_interval_ms: u64,
    /// Inbound silence after which the session is declared dead.
    pub heartbeat_timeout_ms: u64,
    /// STOMP `host` header (virtual host). Defaults to the endpoint host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_host: Option<String>,
}

impl BrokerSettings {
    /// Connect budget as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Heart-beat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heart-beat silence timeout as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            endpoints: vec![
                "wss://api.pillion.app/ws".to_string(),
                "wss://api.pillion.app/ws-fallback".to_string(),
            ],
            connect_timeout_ms: 30_000,
            heartbeat_interval_ms: 10_000,
            heartbeat_timeout_ms: 30_000,
            virtual_host: None,
        }
    }
}
