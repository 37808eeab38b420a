//! Shared fixtures for the ride integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use pillion_core::{Clock, ManualClock, RequestId, RideSummary};
use pillion_rides::{
    AcceptReceipt, ActiveRideCache, BackendError, InFlightQuery, MemorySlot, Offer, RideBackend,
};
use serde_json::Value;

/// Scriptable in-memory backend.
#[derive(Default)]
pub struct FakeBackend {
    accepts: AtomicUsize,
    accept_delay: Mutex<Option<Duration>>,
    accept_error: Mutex<Option<BackendError>>,
    rejects: Mutex<Vec<String>>,
    cancels: Mutex<Vec<RequestId>>,
    in_flight: Mutex<HashMap<String, Vec<Value>>>,
    in_flight_error: Mutex<Option<BackendError>>,
    queries: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delay_accepts(&self, delay: Duration) {
        *self.accept_delay.lock() = Some(delay);
    }

    pub fn fail_accepts(&self, error: BackendError) {
        *self.accept_error.lock() = Some(error);
    }

    pub fn set_in_flight(&self, status: &str, items: Vec<Value>) {
        let _ = self.in_flight.lock().insert(status.to_string(), items);
    }

    pub fn fail_queries(&self, error: BackendError) {
        *self.in_flight_error.lock() = Some(error);
    }

    pub fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub fn rejects(&self) -> Vec<String> {
        self.rejects.lock().clone()
    }

    pub fn cancels(&self) -> Vec<RequestId> {
        self.cancels.lock().clone()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    async fn accept(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError> {
        let _ = self.accepts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.accept_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.accept_error.lock().clone() {
            return Err(error);
        }
        Ok(AcceptReceipt {
            ride_id: offer.ride_id.clone(),
            request_id: offer.request_id.clone(),
            status: Some("ACCEPTED".into()),
        })
    }
}

#[async_trait]
impl RideBackend for FakeBackend {
    async fn accept_direct(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError> {
        self.accept(offer).await
    }

    async fn accept_broadcast(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError> {
        self.accept(offer).await
    }

    async fn accept_join(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError> {
        self.accept(offer).await
    }

    async fn reject_offer(&self, _offer: &Offer, reason: &str) -> Result<(), BackendError> {
        self.rejects.lock().push(reason.to_string());
        Ok(())
    }

    async fn cancel_request(&self, request_id: &RequestId) -> Result<(), BackendError> {
        self.cancels.lock().push(request_id.clone());
        Ok(())
    }

    async fn in_flight_requests(
        &self,
        query: &InFlightQuery,
    ) -> Result<Vec<RideSummary>, BackendError> {
        self.queries.lock().push(query.status.clone());
        if let Some(error) = self.in_flight_error.lock().clone() {
            return Err(error);
        }
        let items = self
            .in_flight
            .lock()
            .get(&query.status)
            .cloned()
            .unwrap_or_default();
        Ok(items
            .iter()
            .filter_map(|v| RideSummary::from_value(v, query.role).ok())
            .collect())
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
}

pub fn memory_cache(clock: &ManualClock) -> Arc<ActiveRideCache> {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    Arc::new(ActiveRideCache::new(
        Arc::new(MemorySlot::new()),
        clock,
        Duration::from_secs(24 * 3600),
    ))
}

/// Poll `condition` until it holds or `limit` passes.
pub async fn eventually(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
