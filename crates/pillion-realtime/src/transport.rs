//! Transport candidates.
//!
//! A [`Connector`] opens a [`BrokerLink`] to one endpoint. The connection
//! manager walks its endpoint list through a single connector, so fallback
//! policy lives in one place and transports stay dumb pipes.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::errors::RealtimeError;
use crate::stomp::{self, Frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something read from a link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// A decoded STOMP frame.
    Frame(Frame),
    /// A heart-beat or transport-level keep-alive.
    Heartbeat,
}

/// A bidirectional frame pipe to the broker.
#[async_trait]
pub trait BrokerLink: Send {
    /// Write one frame.
    async fn send(&mut self, frame: &Frame) -> Result<(), RealtimeError>;

    /// Write one heart-beat.
    async fn send_heartbeat(&mut self) -> Result<(), RealtimeError>;

    /// Read the next item. `None` means the peer closed the link.
    async fn recv(&mut self) -> Option<Result<Inbound, RealtimeError>>;

    /// Close the link. Errors are ignored.
    async fn close(&mut self);
}

/// Opens links to endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link to `endpoint`.
    async fn open(&self, endpoint: &str) -> Result<Box<dyn BrokerLink>, RealtimeError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

/// STOMP over WebSocket, one frame per text message.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn BrokerLink>, RealtimeError> {
        let (ws, response) = connect_async(endpoint)
            .await
            .map_err(|e| RealtimeError::transport(endpoint, e.to_string()))?;
        debug!(endpoint, status = %response.status(), "websocket upgraded");
        Ok(Box::new(WsLink {
            ws,
            endpoint: endpoint.to_string(),
        }))
    }
}

/// A live WebSocket link.
pub struct WsLink {
    ws: WsStream,
    endpoint: String,
}

impl WsLink {
    fn err(&self, e: impl ToString) -> RealtimeError {
        RealtimeError::transport(&self.endpoint, e.to_string())
    }
}

#[async_trait]
impl BrokerLink for WsLink {
    async fn send(&mut self, frame: &Frame) -> Result<(), RealtimeError> {
        trace!(endpoint = %self.endpoint, command = %frame.command, "sending frame");
        self.ws
            .send(Message::Text(frame.encode().into()))
            .await
            .map_err(|e| self.err(e))
    }

    async fn send_heartbeat(&mut self) -> Result<(), RealtimeError> {
        self.ws
            .send(Message::Text("\n".into()))
            .await
            .map_err(|e| self.err(e))
    }

    async fn recv(&mut self) -> Option<Result<Inbound, RealtimeError>> {
        loop {
            let msg = match self.ws.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(self.err(e))),
            };
            let text = match msg {
                Message::Text(text) => text.as_str().to_owned(),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        return Some(Err(RealtimeError::Protocol("non-UTF-8 binary frame".into())));
                    }
                },
                Message::Ping(_) | Message::Pong(_) => return Some(Ok(Inbound::Heartbeat)),
                Message::Close(_) => return None,
                Message::Frame(_) => continue,
            };
            if stomp::is_heartbeat(&text) {
                return Some(Ok(Inbound::Heartbeat));
            }
            return Some(Frame::decode(&text).map(Inbound::Frame));
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Host part of an endpoint URL, used as the default STOMP virtual host.
pub fn endpoint_host(endpoint: &str) -> &str {
    let rest = endpoint
        .split_once("://")
        .map_or(endpoint, |(_, rest)| rest);
    let authority = rest.split(['/', '?']).next().unwrap_or(rest);
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    authority
        .rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map_or(authority, |(host, _)| host)
}
