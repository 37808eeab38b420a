//! Connection manager behaviour against the in-process broker.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use pillion_core::{RideId, SubscriptionKey};
use pillion_realtime::stomp::{Command, HeartBeat};
use pillion_realtime::{
    BrokerEvent, ConnectionManager, ConnectionState, CredentialProvider, EndpointBehavior,
    LoopbackBroker, RealtimeError, StaticCredentials, Topic,
};
use pillion_settings::BrokerSettings;
use tokio::sync::mpsc;

fn settings(endpoints: &[&str]) -> BrokerSettings {
    BrokerSettings {
        endpoints: endpoints.iter().map(|e| (*e).to_string()).collect(),
        ..BrokerSettings::default()
    }
}

fn manager(broker: &LoopbackBroker, endpoints: &[&str]) -> ConnectionManager {
    ConnectionManager::new(
        settings(endpoints),
        Arc::new(broker.clone()),
        Arc::new(StaticCredentials::new("tok")),
    )
}

async fn wait_for_state(manager: &ConnectionManager, wanted: ConnectionState) {
    let mut rx = manager.watch_state();
    let _ = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| *s == wanted))
        .await
        .expect("state not reached")
        .expect("state channel closed");
}

// ── connect ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_handshake() {
    let broker = LoopbackBroker::new();
    broker.set_handshake_delay(Duration::from_millis(500));
    let m = manager(&broker, &["ws://a"]);

    let (a, b) = tokio::join!(m.connect(), m.connect());

    assert_eq!(a, Ok(()));
    assert_eq!(b, Ok(()));
    assert_eq!(m.handshake_attempts(), 1);
    assert_eq!(broker.opens().len(), 1);
    assert_eq!(m.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_observe_the_same_failure() {
    let broker = LoopbackBroker::new();
    broker.set_handshake_delay(Duration::from_millis(500));
    broker.set_behavior("ws://a", EndpointBehavior::Reject("bad token".into()));
    let m = manager(&broker, &["ws://a"]);

    let (a, b) = tokio::join!(m.connect(), m.connect());

    assert!(a.is_err());
    assert_eq!(a, b);
    assert_eq!(m.handshake_attempts(), 1);
}

#[tokio::test]
async fn connect_when_connected_is_a_no_op() {
    let broker = LoopbackBroker::new();
    let m = manager(&broker, &["ws://a"]);
    m.connect().await.unwrap();
    m.connect().await.unwrap();
    assert_eq!(m.handshake_attempts(), 1);
}

#[tokio::test]
async fn falls_back_through_candidates_in_order() {
    let broker = LoopbackBroker::new();
    broker.set_behavior("ws://a", EndpointBehavior::Refuse);
    broker.set_behavior("ws://b", EndpointBehavior::Reject("overloaded".into()));
    let m = manager(&broker, &["ws://a", "ws://b", "ws://c"]);

    m.connect().await.unwrap();

    assert_eq!(broker.opens(), vec!["ws://a", "ws://b", "ws://c"]);
    assert_eq!(m.endpoint().as_deref(), Some("ws://c"));
    assert_eq!(m.handshake_attempts(), 3);
}

#[tokio::test]
async fn exhaustion_aggregates_failures_and_counts_retries() {
    let broker = LoopbackBroker::new();
    broker.set_behavior("ws://a", EndpointBehavior::Refuse);
    broker.set_behavior("ws://b", EndpointBehavior::Refuse);
    let m = manager(&broker, &["ws://a", "ws://b"]);

    let err = m.connect().await.unwrap_err();
    assert_matches!(&err, RealtimeError::Exhausted { failures } if failures.len() == 2);
    assert_eq!(m.state(), ConnectionState::Error);
    assert_eq!(m.retry_count(), 1);

    let _ = m.connect().await.unwrap_err();
    assert_eq!(m.retry_count(), 2);

    broker.set_behavior("ws://b", EndpointBehavior::Accept);
    m.connect().await.unwrap();
    assert_eq!(m.retry_count(), 0);
    assert_eq!(m.endpoint().as_deref(), Some("ws://b"));
}

#[tokio::test(start_paused = true)]
async fn silent_endpoint_hits_the_overall_timeout() {
    let broker = LoopbackBroker::new();
    broker.set_behavior("ws://a", EndpointBehavior::Silent);
    let m = manager(&broker, &["ws://a"]);

    let err = m.connect().await.unwrap_err();
    assert_eq!(err, RealtimeError::Timeout { timeout_ms: 30_000 });
    assert_eq!(m.state(), ConnectionState::Error);
}

#[tokio::test]
async fn handshake_embeds_credential_and_heartbeat_offer() {
    let broker = LoopbackBroker::new();
    let m = manager(&broker, &["wss://rt.pillion.app/ws"]);
    m.connect().await.unwrap();

    let connect = &broker.received()[0];
    assert_eq!(connect.command, Command::Connect);
    assert_eq!(connect.get("Authorization"), Some("Bearer tok"));
    assert_eq!(connect.get("host"), Some("rt.pillion.app"));
    assert_eq!(connect.get("heart-beat"), Some("10000,10000"));
}

struct ExpiredToken;

#[async_trait]
impl CredentialProvider for ExpiredToken {
    async fn credential(&self) -> Result<Option<String>, RealtimeError> {
        Err(RealtimeError::Credential("token expired".into()))
    }
}

#[tokio::test]
async fn credential_failure_never_opens_a_link() {
    let broker = LoopbackBroker::new();
    let m = ConnectionManager::new(
        settings(&["ws://a"]),
        Arc::new(broker.clone()),
        Arc::new(ExpiredToken),
    );
    assert_matches!(m.connect().await, Err(RealtimeError::Credential(_)));
    assert!(broker.opens().is_empty());
}

// ── subscriptions ───────────────────────────────────────────────────

#[tokio::test]
async fn subscribe_requires_a_session() {
    let broker = LoopbackBroker::new();
    let m = manager(&broker, &["ws://a"]);
    assert_matches!(
        m.subscribe(Topic::DriverOffers, |_| {}, None),
        Err(RealtimeError::NotConnected)
    );
}

#[tokio::test]
async fn messages_reach_their_handler_and_bad_frames_are_isolated() {
    let broker = LoopbackBroker::new();
    let m = manager(&broker, &["ws://a"]);
    m.connect().await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _ = m
        .subscribe(
            Topic::RiderMatching,
            move |event| {
                let _ = tx.send(event);
            },
            None,
        )
        .unwrap();
    let _ = m
        .subscribe(Topic::Notifications, |_| {}, Some(SubscriptionKey::from("notes")))
        .unwrap();
    tokio::task::yield_now().await;

    assert_eq!(broker.publish("/user/queue/notifications", "garbage"), 1);
    assert_eq!(
        broker.publish(
            "/user/queue/rider-matching",
            r#"{"status":"ACCEPTED","rideId":42,"requestId":7,"driverName":"A","totalFare":"15000"}"#,
        ),
        1
    );

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_matches!(event, BrokerEvent::Matching(f) if f.ride_id == Some(RideId::from("42")));
    assert_eq!(m.registry().decode_failures(), 1);
    assert!(m.is_connected());
}

#[tokio::test]
async fn tracking_resubscribe_does_not_duplicate_on_the_wire() {
    let broker = LoopbackBroker::new();
    let m = manager(&broker, &["ws://a"]);
    m.connect().await.unwrap();

    let topic = Topic::RideTracking(RideId::from("9"));
    let _ = m.subscribe(topic.clone(), |_| {}, None).unwrap();
    let _ = m.subscribe(topic, |_| {}, None).unwrap();
    tokio::task::yield_now().await;

    assert_eq!(
        broker.subscriptions(),
        vec![("tracking:9".to_string(), "/topic/rides/9/tracking".to_string())]
    );
}

// ── disconnect ──────────────────────────────────────────────────────

#[tokio::test]
async fn disconnect_unsubscribes_and_is_idempotent() {
    let broker = LoopbackBroker::new();
    let m = manager(&broker, &["ws://a"]);
    m.connect().await.unwrap();
    let _ = m.subscribe(Topic::DriverOffers, |_| {}, None).unwrap();
    let _ = m.subscribe(Topic::Notifications, |_| {}, None).unwrap();

    m.disconnect().await;

    let commands: Vec<_> = broker.received().iter().map(|f| f.command).collect();
    assert_eq!(commands.iter().filter(|c| **c == Command::Unsubscribe).count(), 2);
    assert_eq!(commands.last(), Some(&Command::Disconnect));
    assert_eq!(m.state(), ConnectionState::Disconnected);
    assert!(m.registry().is_empty());

    m.disconnect().await;
    assert_eq!(m.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_before_connect_is_a_no_op() {
    let broker = LoopbackBroker::new();
    let m = manager(&broker, &["ws://a"]);
    m.disconnect().await;
    assert_eq!(m.state(), ConnectionState::Disconnected);
    assert!(broker.opens().is_empty());
}

// ── session loss ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn heartbeat_silence_fails_the_session() {
    let broker = LoopbackBroker::new();
    broker.set_heart_beat(HeartBeat::symmetric(10_000));
    let m = manager(&broker, &["ws://a"]);
    m.connect().await.unwrap();
    let _ = m.subscribe(Topic::DriverOffers, |_| {}, None).unwrap();

    wait_for_state(&m, ConnectionState::Error).await;

    assert!(m.registry().is_empty());
    assert!(broker.heartbeats_received() >= 1);
    assert_matches!(
        m.subscribe(Topic::DriverOffers, |_| {}, None),
        Err(RealtimeError::NotConnected)
    );
}

#[tokio::test]
async fn dropped_session_needs_an_explicit_reconnect() {
    let broker = LoopbackBroker::new();
    let m = manager(&broker, &["ws://a"]);
    m.connect().await.unwrap();
    let _ = m.subscribe(Topic::RiderMatching, |_| {}, None).unwrap();

    broker.drop_connection();
    wait_for_state(&m, ConnectionState::Error).await;
    assert!(m.registry().is_empty());
    assert_eq!(broker.opens().len(), 1);

    m.connect().await.unwrap();
    assert_eq!(broker.opens().len(), 2);
    assert!(m.subscribe(Topic::RiderMatching, |_| {}, None).is_ok());
}
