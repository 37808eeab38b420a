//! In-process broker.
//!
//! [`LoopbackBroker`] is a [`Connector`] that never leaves the process. It
//! speaks just enough STOMP to complete handshakes, track subscriptions and
//! deliver published messages, and lets each endpoint be scripted to accept,
//! refuse, reject or ignore the handshake. Useful for tests and for running
//! the coordination layer without a backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::errors::RealtimeError;
use crate::stomp::{Command, Frame, HeartBeat};
use crate::transport::{BrokerLink, Connector, Inbound};

/// How an endpoint answers a connection attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointBehavior {
    /// Open the link and answer `CONNECT` with `CONNECTED`.
    Accept,
    /// Fail to open the link.
    Refuse,
    /// Answer `CONNECT` with an `ERROR` frame carrying this message.
    Reject(String),
    /// Open the link and never answer.
    Silent,
}

struct LinkState {
    endpoint: String,
    to_client: Option<mpsc::UnboundedSender<Inbound>>,
    received: Vec<Frame>,
    subscriptions: Vec<(String, String)>,
    heartbeats: u64,
}

#[derive(Default)]
struct BrokerState {
    behaviors: HashMap<String, EndpointBehavior>,
    heart_beat: HeartBeat,
    handshake_delay: Duration,
    opens: Vec<String>,
    links: Vec<LinkState>,
}

impl BrokerState {
    fn latest(&mut self) -> Option<&mut LinkState> {
        self.links.last_mut()
    }
}

/// A scriptable in-process broker.
#[derive(Clone, Default)]
pub struct LoopbackBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl LoopbackBroker {
    /// Broker whose endpoints all accept.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script how `endpoint` answers.
    pub fn set_behavior(&self, endpoint: &str, behavior: EndpointBehavior) {
        let _ = self
            .state
            .lock()
            .behaviors
            .insert(endpoint.to_string(), behavior);
    }

    /// `heart-beat` header sent in `CONNECTED` (default `0,0`).
    pub fn set_heart_beat(&self, heart_beat: HeartBeat) {
        self.state.lock().heart_beat = heart_beat;
    }

    /// Delay before answering `CONNECT`.
    pub fn set_handshake_delay(&self, delay: Duration) {
        self.state.lock().handshake_delay = delay;
    }

    /// Endpoints opened so far, in order.
    pub fn opens(&self) -> Vec<String> {
        self.state.lock().opens.clone()
    }

    /// Frames received on the most recent link.
    pub fn received(&self) -> Vec<Frame> {
        self.state
            .lock()
            .latest()
            .map(|l| l.received.clone())
            .unwrap_or_default()
    }

    /// Active `(id, destination)` subscriptions on the most recent link.
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .latest()
            .map(|l| l.subscriptions.clone())
            .unwrap_or_default()
    }

    /// Heart-beats received on the most recent link.
    pub fn heartbeats_received(&self) -> u64 {
        self.state.lock().latest().map_or(0, |l| l.heartbeats)
    }

    /// Deliver `body` to every subscription on `destination` of the most
    /// recent link. Returns the number of deliveries.
    pub fn publish(&self, destination: &str, body: &str) -> usize {
        let mut state = self.state.lock();
        let Some(link) = state.latest() else {
            return 0;
        };
        let Some(tx) = link.to_client.as_ref() else {
            return 0;
        };
        let mut delivered = 0;
        for (id, dest) in &link.subscriptions {
            if dest != destination {
                continue;
            }
            let frame = Frame::new(Command::Message)
                .header("subscription", id.as_str())
                .header("destination", dest.as_str())
                .header("message-id", format!("m-{}", link.received.len() + delivered))
                .with_body(body);
            if tx.send(Inbound::Frame(frame)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Push a raw inbound item to the most recent link.
    pub fn push(&self, inbound: Inbound) -> bool {
        let mut state = self.state.lock();
        state
            .latest()
            .and_then(|l| l.to_client.as_ref())
            .is_some_and(|tx| tx.send(inbound).is_ok())
    }

    /// Close the most recent link from the broker side.
    pub fn drop_connection(&self) {
        if let Some(link) = self.state.lock().latest() {
            link.to_client = None;
        }
    }
}

#[async_trait]
impl Connector for LoopbackBroker {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn BrokerLink>, RealtimeError> {
        let mut state = self.state.lock();
        state.opens.push(endpoint.to_string());
        let behavior = state
            .behaviors
            .get(endpoint)
            .cloned()
            .unwrap_or(EndpointBehavior::Accept);
        if behavior == EndpointBehavior::Refuse {
            return Err(RealtimeError::transport(endpoint, "connection refused"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.links.push(LinkState {
            endpoint: endpoint.to_string(),
            to_client: Some(tx),
            received: Vec::new(),
            subscriptions: Vec::new(),
            heartbeats: 0,
        });
        Ok(Box::new(LoopbackLink {
            index: state.links.len() - 1,
            behavior,
            state: Arc::clone(&self.state),
            rx,
        }))
    }
}

struct LoopbackLink {
    index: usize,
    behavior: EndpointBehavior,
    state: Arc<Mutex<BrokerState>>,
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl BrokerLink for LoopbackLink {
    async fn send(&mut self, frame: &Frame) -> Result<(), RealtimeError> {
        if frame.command == Command::Connect {
            let delay = self.state.lock().handshake_delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let mut state = self.state.lock();
        let heart_beat = state.heart_beat;
        let link = &mut state.links[self.index];
        let Some(tx) = link.to_client.clone() else {
            return Err(RealtimeError::transport(&link.endpoint, "link closed"));
        };
        link.received.push(frame.clone());

        match frame.command {
            Command::Connect => match &self.behavior {
                EndpointBehavior::Accept => {
                    let reply = Frame::new(Command::Connected)
                        .header("version", "1.2")
                        .header("heart-beat", heart_beat.to_string());
                    let _ = tx.send(Inbound::Frame(reply));
                }
                EndpointBehavior::Reject(message) => {
                    let reply = Frame::new(Command::Error).header("message", message.as_str());
                    let _ = tx.send(Inbound::Frame(reply));
                }
                EndpointBehavior::Silent | EndpointBehavior::Refuse => {}
            },
            Command::Subscribe => {
                if let (Some(id), Some(dest)) = (frame.get("id"), frame.get("destination")) {
                    link.subscriptions.retain(|(existing, _)| existing != id);
                    link.subscriptions.push((id.to_string(), dest.to_string()));
                }
            }
            Command::Unsubscribe => {
                if let Some(id) = frame.get("id") {
                    link.subscriptions.retain(|(existing, _)| existing != id);
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn send_heartbeat(&mut self) -> Result<(), RealtimeError> {
        let mut state = self.state.lock();
        let link = &mut state.links[self.index];
        if link.to_client.is_none() {
            return Err(RealtimeError::transport(&link.endpoint, "link closed"));
        }
        link.heartbeats += 1;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Inbound, RealtimeError>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        let mut state = self.state.lock();
        let link = &mut state.links[self.index];
        link.to_client = None;
        link.subscriptions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn accepts_and_tracks_subscriptions() {
        let broker = LoopbackBroker::new();
        let mut link = broker.open("ws://a").await.unwrap();
        link.send(&Frame::connect("a", None, HeartBeat::default())).await.unwrap();
        assert_matches!(
            link.recv().await,
            Some(Ok(Inbound::Frame(f))) if f.command == Command::Connected
        );

        link.send(&Frame::subscribe("s1", "/q")).await.unwrap();
        assert_eq!(broker.publish("/q", "{}"), 1);
        assert_matches!(
            link.recv().await,
            Some(Ok(Inbound::Frame(f))) if f.get("subscription") == Some("s1")
        );

        link.send(&Frame::unsubscribe("s1")).await.unwrap();
        assert_eq!(broker.publish("/q", "{}"), 0);
    }

    #[tokio::test]
    async fn refuse_and_reject() {
        let broker = LoopbackBroker::new();
        broker.set_behavior("ws://down", EndpointBehavior::Refuse);
        broker.set_behavior("ws://auth", EndpointBehavior::Reject("bad token".into()));

        assert!(broker.open("ws://down").await.is_err());

        let mut link = broker.open("ws://auth").await.unwrap();
        link.send(&Frame::connect("auth", None, HeartBeat::default())).await.unwrap();
        assert_matches!(
            link.recv().await,
            Some(Ok(Inbound::Frame(f))) if f.command == Command::Error
        );
        assert_eq!(broker.opens(), vec!["ws://down", "ws://auth"]);
    }

    #[tokio::test]
    async fn drop_connection_ends_the_stream() {
        let broker = LoopbackBroker::new();
        let mut link = broker.open("ws://a").await.unwrap();
        broker.drop_connection();
        assert!(link.recv().await.is_none());
        assert!(link.send(&Frame::disconnect()).await.is_err());
    }
}
