//! End-to-end coordination over the in-process broker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{FakeBackend, eventually, memory_cache, start_time};
use pillion_core::{ManualClock, RequestId, RideId, Role};
use pillion_realtime::{
    ConnectionManager, ConnectionState, EndpointBehavior, LoopbackBroker, StaticCredentials,
};
use pillion_rides::{
    ActiveRideCache, ActiveRidePatch, CoordinatorError, CoordinatorParts, MatchState, OfferKey,
    OfferState, ReconcileOutcome, Resolution, RideCoordinator,
};
use pillion_settings::{BrokerSettings, OfferSettings};
use serde_json::json;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    broker: LoopbackBroker,
    backend: Arc<FakeBackend>,
    cache: Arc<ActiveRideCache>,
    coordinator: RideCoordinator,
}

fn harness() -> Harness {
    let broker = LoopbackBroker::new();
    let backend = FakeBackend::new();
    let clock = ManualClock::new(start_time());
    let cache = memory_cache(&clock);
    let connection = ConnectionManager::new(
        BrokerSettings {
            endpoints: vec!["ws://primary".into(), "ws://fallback".into()],
            ..BrokerSettings::default()
        },
        Arc::new(broker.clone()),
        Arc::new(StaticCredentials::new("tok")),
    );
    let coordinator = RideCoordinator::new(CoordinatorParts {
        connection,
        backend: backend.clone(),
        cache: Arc::clone(&cache),
        clock: Arc::new(clock),
        offers: OfferSettings::default(),
        page_size: 10,
    });
    Harness {
        broker,
        backend,
        cache,
        coordinator,
    }
}

impl Harness {
    async fn wait_for_subscription(&self, destination: &str) {
        let found = eventually(WAIT, || {
            self.broker
                .subscriptions()
                .iter()
                .any(|(_, d)| d == destination)
        })
        .await;
        assert!(found, "no subscription to {destination}");
    }
}

#[tokio::test]
async fn driver_online_receives_and_accepts_offers() {
    let h = harness();
    h.coordinator.go_online(Role::Driver).await.unwrap();
    h.wait_for_subscription("/user/queue/driver-offers").await;
    h.wait_for_subscription("/user/queue/notifications").await;

    let delivered = h.broker.publish(
        "/user/queue/driver-offers",
        r#"{"requestId":7,"rideId":42,"riderName":"Lan","totalFare":"15000"}"#,
    );
    assert_eq!(delivered, 1);
    let offers = h.coordinator.offers();
    assert!(eventually(WAIT, || offers.current().is_some()).await);

    let key = OfferKey::Request(RequestId::from("7"));
    assert_eq!(
        offers.accept(&key).await,
        Ok(Resolution::Committed(OfferState::Accepted))
    );
    let record = h.cache.load().unwrap();
    assert_eq!(record.ride_id, Some(RideId::from("42")));
    assert_eq!(record.role, Some(Role::Driver));
}

#[tokio::test]
async fn malformed_offer_does_not_break_other_topics() {
    let h = harness();
    let mut notifications = h.coordinator.notifications();
    h.coordinator.go_online(Role::Driver).await.unwrap();
    h.wait_for_subscription("/user/queue/notifications").await;

    let _ = h.broker.publish("/user/queue/driver-offers", "{not json");
    let _ = h.broker.publish(
        "/user/queue/notifications",
        r#"{"type":"PROMO","title":"Hi","message":"Welcome"}"#,
    );

    let note = tokio::time::timeout(WAIT, notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(note.title.as_deref(), Some("Hi"));
    assert_eq!(h.coordinator.connection().state(), ConnectionState::Connected);
    assert!(h.coordinator.offers().presented().is_empty());
}

#[tokio::test]
async fn rider_match_is_cached_and_tracking_clears_it() {
    let h = harness();
    h.coordinator.go_online(Role::Rider).await.unwrap();
    h.coordinator.matching().begin(Some(RequestId::from("7")));
    h.wait_for_subscription("/user/queue/rider-matching").await;

    let _ = h.broker.publish(
        "/user/queue/rider-matching",
        r#"{"status":"ACCEPTED","rideId":42,"requestId":7,"driverName":"A","totalFare":"15000"}"#,
    );
    let cache = Arc::clone(&h.cache);
    assert!(eventually(WAIT, || cache.load().is_some()).await);
    let record = h.cache.load().unwrap();
    assert_eq!(record.ride_id, Some(RideId::from("42")));
    assert_eq!(record.request_id, Some(RequestId::from("7")));
    assert_matches!(h.coordinator.matching().state(), MatchState::Matched { .. });

    let tracking = h.coordinator.track_ride(RideId::from("42")).unwrap();
    h.wait_for_subscription("/topic/rides/42/tracking").await;
    let _ = h
        .broker
        .publish("/topic/rides/42/tracking", r#"{"rideId":42,"status":"ONGOING","lat":10.7,"lng":106.6}"#);
    assert!(
        eventually(WAIT, || cache
            .load()
            .is_some_and(|r| r.status.as_deref() == Some("ONGOING")))
        .await
    );

    let _ = h
        .broker
        .publish("/topic/rides/42/tracking", r#"{"rideId":42,"status":"COMPLETED"}"#);
    assert!(eventually(WAIT, || cache.load().is_none()).await);

    let registry = Arc::clone(h.coordinator.connection().registry());
    assert!(eventually(WAIT, || !registry.contains(&tracking)).await);
    let broker = h.broker.clone();
    assert!(
        eventually(WAIT, || broker
            .subscriptions()
            .iter()
            .all(|(_, d)| d != "/topic/rides/42/tracking"))
        .await
    );
}

#[tokio::test]
async fn online_with_cached_ride_resumes_tracking() {
    let h = harness();
    let _ = h.cache.save(ActiveRidePatch {
        ride_id: Some(RideId::from("9")),
        role: Some(Role::Driver),
        ..ActiveRidePatch::default()
    });
    h.coordinator.go_online(Role::Driver).await.unwrap();
    h.wait_for_subscription("/topic/rides/9/tracking").await;
}

#[tokio::test]
async fn resume_reconciles_then_reconnects() {
    let h = harness();
    h.coordinator.go_online(Role::Driver).await.unwrap();
    h.broker.drop_connection();
    let connection = h.coordinator.connection().clone();
    assert!(eventually(WAIT, || connection.state() == ConnectionState::Error).await);

    h.backend.set_in_flight(
        "ACCEPTED",
        vec![json!({"requestId": 11, "rideId": 55, "riderName": "B"})],
    );
    let outcome = h.coordinator.resume().await.unwrap();
    assert_matches!(outcome, Some(ReconcileOutcome::Restored(s)) if s.ride_id == Some(RideId::from("55")));
    assert_eq!(h.backend.queries(), vec!["ONGOING", "ACCEPTED"]);

    assert_eq!(h.coordinator.connection().state(), ConnectionState::Connected);
    assert_eq!(h.broker.opens().len(), 2);
    h.wait_for_subscription("/user/queue/driver-offers").await;
    h.wait_for_subscription("/topic/rides/55/tracking").await;
}

#[tokio::test]
async fn resume_with_unreachable_backend_keeps_the_cache() {
    let h = harness();
    let _ = h.cache.save(ActiveRidePatch {
        ride_id: Some(RideId::from("9")),
        request_id: Some(RequestId::from("3")),
        ..ActiveRidePatch::default()
    });
    h.coordinator.go_online(Role::Rider).await.unwrap();
    h.backend
        .fail_queries(pillion_rides::BackendError::Network("offline".into()));

    assert_eq!(h.coordinator.resume().await, Ok(None));
    assert_eq!(
        h.cache.load().and_then(|r| r.ride_id),
        Some(RideId::from("9"))
    );
}

#[tokio::test]
async fn resume_while_offline_is_rejected() {
    let h = harness();
    assert_eq!(h.coordinator.resume().await, Err(CoordinatorError::Offline));
    assert!(h.broker.opens().is_empty());
}

#[tokio::test]
async fn endpoint_fallback_is_transparent() {
    let h = harness();
    h.broker
        .set_behavior("ws://primary", EndpointBehavior::Refuse);
    h.coordinator.go_online(Role::Driver).await.unwrap();
    assert_eq!(
        h.coordinator.connection().endpoint().as_deref(),
        Some("ws://fallback")
    );
}

#[tokio::test]
async fn go_offline_withdraws_offers_and_keeps_the_cache() {
    let h = harness();
    let _ = h.cache.save(ActiveRidePatch {
        ride_id: Some(RideId::from("9")),
        ..ActiveRidePatch::default()
    });
    h.coordinator.go_online(Role::Driver).await.unwrap();
    h.wait_for_subscription("/user/queue/driver-offers").await;
    let _ = h
        .broker
        .publish("/user/queue/driver-offers", r#"{"requestId":1}"#);
    let offers = h.coordinator.offers();
    assert!(eventually(WAIT, || offers.current().is_some()).await);

    h.coordinator.go_offline().await;

    assert!(offers.presented().is_empty());
    assert_eq!(h.coordinator.role(), None);
    assert_eq!(
        h.coordinator.connection().state(),
        ConnectionState::Disconnected
    );
    assert!(h.cache.load().is_some());
}

#[tokio::test]
async fn cancel_active_request_settles_matching() {
    let h = harness();
    let _ = h.cache.save(ActiveRidePatch {
        request_id: Some(RequestId::from("7")),
        role: Some(Role::Rider),
        status: Some("PENDING".into()),
        ..ActiveRidePatch::default()
    });
    h.coordinator.go_online(Role::Rider).await.unwrap();
    assert_eq!(
        h.coordinator.matching().state(),
        MatchState::Searching {
            request_id: Some(RequestId::from("7"))
        }
    );

    assert_eq!(
        h.coordinator.cancel_active_request().await,
        Ok(RequestId::from("7"))
    );
    assert_eq!(h.backend.cancels(), vec![RequestId::from("7")]);
    assert!(h.cache.load().is_none());
    assert_eq!(
        h.coordinator.cancel_active_request().await,
        Err(CoordinatorError::NoActiveRequest)
    );
}
