//! Connection manager.
//!
//! Owns the one logical broker session of the process. The manager is an
//! explicitly constructed service; clones share the same session.
//!
//! ## Connect
//!
//! `connect()` is idempotent. The first caller spawns the handshake task and
//! parks a shared handle in the in-flight slot; every concurrent caller awaits
//! that same handle and observes the same result. The handshake walks the
//! configured endpoints in priority order under one overall timeout. There is
//! no background reconnection: a failed or dropped session stays in
//! [`ConnectionState::Error`] until someone calls `connect()` again.
//!
//! ## Session
//!
//! Once `CONNECTED` arrives a session task owns the link. It forwards
//! registry frames out, dispatches `MESSAGE` frames in, sends heart-beats and
//! watches inbound liveness. Any transport failure or sustained silence tears
//! the session down, drops every subscription and moves to `Error`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use pillion_core::SubscriptionKey;
use pillion_settings::BrokerSettings;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::credentials::CredentialProvider;
use crate::errors::RealtimeError;
use crate::heartbeat::{HeartbeatResult, Liveness, run_heartbeat};
use crate::registry::SubscriptionRegistry;
use crate::stomp::{Command, Frame, HeartBeat, Negotiated};
use crate::topics::{BrokerEvent, Topic};
use crate::transport::{BrokerLink, Connector, Inbound, WsConnector, endpoint_host};

/// Session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and no attempt in progress.
    Disconnected,
    /// A handshake is in flight.
    Connecting,
    /// A session is live.
    Connected,
    /// The last attempt failed or the session was lost.
    Error,
}

type ConnectFuture = Shared<BoxFuture<'static, Result<(), RealtimeError>>>;

struct Session {
    generation: u64,
    endpoint: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    settings: BrokerSettings,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    registry: Arc<SubscriptionRegistry>,
    state_tx: watch::Sender<ConnectionState>,
    in_flight: Mutex<Option<ConnectFuture>>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    handshakes: AtomicU64,
    retries: AtomicU32,
}

/// Handle to the broker session.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager. Nothing touches the network until [`connect`](Self::connect).
    pub fn new(
        settings: BrokerSettings,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                settings,
                connector,
                credentials,
                registry: Arc::new(SubscriptionRegistry::new()),
                state_tx,
                in_flight: Mutex::new(None),
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                handshakes: AtomicU64::new(0),
                retries: AtomicU32::new(0),
            }),
        }
    }

    /// Create a manager that speaks STOMP over WebSocket.
    pub fn websocket(settings: BrokerSettings, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::new(settings, Arc::new(WsConnector), credentials)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Establish the session, or join the attempt already in flight.
    ///
    /// Returns immediately when already connected.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        let attempt = {
            let mut slot = self.inner.in_flight.lock();
            if let Some(attempt) = slot.as_ref() {
                attempt.clone()
            } else {
                if self.state() == ConnectionState::Connected {
                    return Ok(());
                }
                self.inner.set_state(ConnectionState::Connecting);
                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(async move { inner.establish().await });
                let attempt = async move { task.await.unwrap_or(Err(RealtimeError::Closed)) }
                    .boxed()
                    .shared();
                *slot = Some(attempt.clone());
                attempt
            }
        };
        attempt.await
    }

    /// Tear the session down.
    ///
    /// Waits for an in-flight connect to settle, unsubscribes everything
    /// (best-effort), sends `DISCONNECT` and closes the transport. Safe to
    /// call when already disconnected.
    pub async fn disconnect(&self) {
        let pending = self.inner.in_flight.lock().clone();
        if let Some(pending) = pending {
            let _ = pending.await;
        }

        let session = self.inner.session.lock().take();
        let Some(session) = session else {
            if self.state() != ConnectionState::Disconnected {
                self.inner.set_state(ConnectionState::Disconnected);
            }
            return;
        };

        let removed = self.inner.registry.unsubscribe_all();
        let _ = self.inner.registry.detach();
        session.cancel.cancel();
        if let Err(e) = session.task.await {
            warn!(error = %e, "session task ended abnormally");
        }
        self.inner.set_state(ConnectionState::Disconnected);
        info!(endpoint = %session.endpoint, unsubscribed = removed, "disconnected from broker");
    }

    // ── Observation ─────────────────────────────────────────────────

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Whether a session is live.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Endpoint of the live session.
    pub fn endpoint(&self) -> Option<String> {
        self.inner.session.lock().as_ref().map(|s| s.endpoint.clone())
    }

    /// Endpoint handshakes attempted since creation.
    pub fn handshake_attempts(&self) -> u64 {
        self.inner.handshakes.load(Ordering::Relaxed)
    }

    /// Consecutive failed connects (reset on success).
    pub fn retry_count(&self) -> u32 {
        self.inner.retries.load(Ordering::Relaxed)
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// The subscription registry multiplexed over this session.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    /// Shorthand for [`SubscriptionRegistry::subscribe`].
    pub fn subscribe(
        &self,
        topic: Topic,
        handler: impl Fn(BrokerEvent) + Send + Sync + 'static,
        key: Option<SubscriptionKey>,
    ) -> Result<SubscriptionKey, RealtimeError> {
        self.inner.registry.subscribe(topic, handler, key)
    }

    /// Shorthand for [`SubscriptionRegistry::unsubscribe`].
    pub fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        self.inner.registry.unsubscribe(key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "connection state changed");
        }
    }

    async fn establish(self: Arc<Self>) -> Result<(), RealtimeError> {
        let budget = self.settings.connect_timeout();
        let outcome = match time::timeout(budget, self.handshake_any()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RealtimeError::Timeout {
                timeout_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        let result = match outcome {
            Ok((link, endpoint, negotiated)) => {
                self.start_session(link, endpoint, negotiated);
                self.retries.store(0, Ordering::Relaxed);
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(error) => {
                let retries = self.retries.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(%error, retries, "broker connect failed");
                self.set_state(ConnectionState::Error);
                Err(error)
            }
        };
        let _ = self.in_flight.lock().take();
        result
    }

    async fn handshake_any(
        &self,
    ) -> Result<(Box<dyn BrokerLink>, String, Negotiated), RealtimeError> {
        let token = self.credentials.credential().await?;
        let mut failures = Vec::with_capacity(self.settings.endpoints.len());

        for endpoint in &self.settings.endpoints {
            let attempt = self.handshakes.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(endpoint, attempt, "attempting broker handshake");
            match self.handshake(endpoint, token.as_deref()).await {
                Ok((link, negotiated)) => {
                    info!(endpoint, ?negotiated, "connected to broker");
                    return Ok((link, endpoint.clone(), negotiated));
                }
                Err(error) => {
                    warn!(endpoint, %error, "endpoint failed, trying next candidate");
                    failures.push(format!("{endpoint}: {error}"));
                }
            }
        }
        Err(RealtimeError::Exhausted { failures })
    }

    async fn handshake(
        &self,
        endpoint: &str,
        token: Option<&str>,
    ) -> Result<(Box<dyn BrokerLink>, Negotiated), RealtimeError> {
        let mut link = self.connector.open(endpoint).await?;
        let host = self
            .settings
            .virtual_host
            .as_deref()
            .unwrap_or_else(|| endpoint_host(endpoint));
        let offer = HeartBeat::symmetric(self.settings.heartbeat_interval_ms);

        let reply = match link.send(&Frame::connect(host, token, offer)).await {
            Ok(()) => first_frame(link.as_mut(), endpoint).await,
            Err(e) => Err(e),
        };

        let frame = match reply {
            Ok(frame) => frame,
            Err(e) => {
                link.close().await;
                return Err(e);
            }
        };
        match frame.command {
            Command::Connected => {
                let server = frame
                    .get("heart-beat")
                    .and_then(HeartBeat::parse)
                    .unwrap_or_default();
                Ok((link, offer.negotiate(server)))
            }
            Command::Error => {
                link.close().await;
                let message = frame
                    .get("message")
                    .map_or_else(|| frame.body.clone(), str::to_string);
                Err(RealtimeError::Protocol(format!("handshake rejected: {message}")))
            }
            other => {
                link.close().await;
                Err(RealtimeError::Protocol(format!(
                    "expected CONNECTED, got {other}"
                )))
            }
        }
    }

    // ── Session ─────────────────────────────────────────────────────

    fn start_session(self: &Arc<Self>, link: Box<dyn BrokerLink>, endpoint: String, negotiated: Negotiated) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        self.registry.attach(outbound_tx);
        let ctx = SessionContext {
            owner: Arc::downgrade(self),
            registry: Arc::clone(&self.registry),
            generation,
            negotiated,
            silence_timeout: self.settings.heartbeat_timeout(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run_session(ctx, link, outbound_rx));

        let previous = self.session.lock().replace(Session {
            generation,
            endpoint,
            cancel,
            task,
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    fn session_lost(&self, generation: u64, error: &RealtimeError) {
        let mut session = self.session.lock();
        if session.as_ref().is_none_or(|s| s.generation != generation) {
            return;
        }
        let lost = session.take();
        drop(session);

        let dropped = self.registry.detach();
        let _ = self.retries.fetch_add(1, Ordering::Relaxed);
        self.set_state(ConnectionState::Error);
        warn!(
            endpoint = ?lost.map(|s| s.endpoint),
            %error,
            dropped_subscriptions = dropped,
            "broker session lost"
        );
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}

struct SessionContext {
    owner: Weak<Inner>,
    registry: Arc<SubscriptionRegistry>,
    generation: u64,
    negotiated: Negotiated,
    silence_timeout: Duration,
    cancel: CancellationToken,
}

enum SessionEnd {
    Closed,
    Failed(RealtimeError),
}

async fn run_session(
    ctx: SessionContext,
    mut link: Box<dyn BrokerLink>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
) {
    let liveness = Arc::new(Liveness::new());
    let monitor_cancel = ctx.cancel.child_token();
    let monitor = {
        let liveness = Arc::clone(&liveness);
        let expect_every = ctx.negotiated.expect_every;
        let timeout = ctx.silence_timeout;
        let cancel = monitor_cancel.clone();
        async move {
            match expect_every {
                Some(interval) => run_heartbeat(liveness, interval, timeout.max(interval), cancel).await,
                None => {
                    cancel.cancelled().await;
                    HeartbeatResult::Cancelled
                }
            }
        }
    };
    tokio::pin!(monitor);
    let mut beat = ctx
        .negotiated
        .send_every
        .map(|every| time::interval_at(time::Instant::now() + every, every));

    let end = loop {
        tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break SessionEnd::Closed,
            result = &mut monitor => {
                if result == HeartbeatResult::TimedOut {
                    let timeout_ms = u64::try_from(ctx.silence_timeout.as_millis()).unwrap_or(u64::MAX);
                    break SessionEnd::Failed(RealtimeError::Timeout { timeout_ms });
                }
                break SessionEnd::Closed;
            }
            Some(frame) = outbound.recv() => {
                if let Err(e) = link.send(&frame).await {
                    break SessionEnd::Failed(e);
                }
            }
            () = next_beat(&mut beat) => {
                if let Err(e) = link.send_heartbeat().await {
                    break SessionEnd::Failed(e);
                }
            }
            inbound = link.recv() => match inbound {
                Some(Ok(Inbound::Heartbeat)) => liveness.mark_alive(),
                Some(Ok(Inbound::Frame(frame))) => {
                    liveness.mark_alive();
                    match frame.command {
                        Command::Message => ctx.registry.dispatch(&frame),
                        Command::Error => {
                            let message = frame.get("message").unwrap_or("broker error").to_string();
                            break SessionEnd::Failed(RealtimeError::Protocol(message));
                        }
                        other => debug!(command = %other, "ignoring frame"),
                    }
                }
                Some(Err(RealtimeError::Protocol(message))) => {
                    warn!(%message, "dropping malformed frame");
                }
                Some(Err(e)) => break SessionEnd::Failed(e),
                None => break SessionEnd::Failed(RealtimeError::Closed),
            },
        }
    };
    monitor_cancel.cancel();

    match end {
        SessionEnd::Closed => {
            while let Ok(frame) = outbound.try_recv() {
                if link.send(&frame).await.is_err() {
                    break;
                }
            }
            let _ = link.send(&Frame::disconnect()).await;
            link.close().await;
        }
        SessionEnd::Failed(error) => {
            link.close().await;
            if let Some(owner) = ctx.owner.upgrade() {
                owner.session_lost(ctx.generation, &error);
            }
        }
    }
}

async fn first_frame(link: &mut dyn BrokerLink, endpoint: &str) -> Result<Frame, RealtimeError> {
    loop {
        match link.recv().await {
            Some(Ok(Inbound::Heartbeat)) => {}
            Some(Ok(Inbound::Frame(frame))) => return Ok(frame),
            Some(Err(e)) => return Err(e),
            None => return Err(RealtimeError::transport(endpoint, "closed during handshake")),
        }
    }
}

async fn next_beat(beat: &mut Option<Interval>) {
    match beat {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
