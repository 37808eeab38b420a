//! # pillion-realtime
//!
//! The broker side of the Pillion coordination layer.
//!
//! - [`ConnectionManager`]: one logical STOMP session with endpoint fallback,
//!   shared in-flight connects, credential injection and heart-beating
//! - [`SubscriptionRegistry`]: keyed topic handlers multiplexed over that
//!   session, with per-subscription decode isolation
//! - [`transport`]: the [`Connector`]/[`BrokerLink`] seam and its WebSocket
//!   implementation
//! - [`loopback`]: an in-process broker implementing the same seam
//!
//! ```no_run
//! # async fn demo() -> Result<(), pillion_realtime::RealtimeError> {
//! use std::sync::Arc;
//! use pillion_realtime::{ConnectionManager, StaticCredentials, Topic};
//!
//! let settings = pillion_settings::get_settings().broker.clone();
//! let manager = ConnectionManager::websocket(settings, Arc::new(StaticCredentials::new("token")));
//! manager.connect().await?;
//! let _key = manager.subscribe(Topic::Notifications, |event| println!("{event:?}"), None)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod connection;
pub mod credentials;
pub mod errors;
pub mod heartbeat;
pub mod loopback;
pub mod registry;
pub mod stomp;
pub mod topics;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState};
pub use credentials::{CredentialProvider, StaticCredentials};
pub use errors::RealtimeError;
pub use loopback::{EndpointBehavior, LoopbackBroker};
pub use registry::{EventHandler, SubscriptionRegistry};
pub use topics::{BrokerEvent, Topic};
pub use transport::{BrokerLink, Connector, Inbound, WsConnector};
