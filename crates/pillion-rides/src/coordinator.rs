//! Ride coordinator.
//!
//! Wires the broker session to the offer controller, the matching tracker
//! and ride tracking, and owns the explicit lifecycle actions. Nothing here
//! reconnects on its own: a dropped session stays down until the host
//! calls [`RideCoordinator::go_online`] or [`RideCoordinator::resume`].

use std::sync::Arc;

use parking_lot::Mutex;
use pillion_core::{Clock, NotificationFrame, RequestId, RideId, Role, SubscriptionKey, SystemClock};
use pillion_realtime::{BrokerEvent, ConnectionManager, CredentialProvider, Topic};
use pillion_settings::{OfferSettings, PillionSettings};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::backend::{HttpRideBackend, RideBackend};
use crate::cache::ActiveRideCache;
use crate::controller::OfferController;
use crate::errors::CoordinatorError;
use crate::matching::MatchTracker;
use crate::reconcile::{ReconcileOutcome, Reconciler};
use crate::tracking::{RideTracker, TrackingOutcome};

const DRIVER_OFFERS_KEY: &str = "driver-offers";
const RIDER_MATCHING_KEY: &str = "rider-matching";
const NOTIFICATIONS_KEY: &str = "notifications";
const NOTIFICATION_CAPACITY: usize = 32;

/// Collaborators for a [`RideCoordinator`].
pub struct CoordinatorParts {
    /// Broker session.
    pub connection: ConnectionManager,
    /// Confirmation API.
    pub backend: Arc<dyn RideBackend>,
    /// Active ride cache.
    pub cache: Arc<ActiveRideCache>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Offer settings.
    pub offers: OfferSettings,
    /// Page size for reconciliation queries.
    pub page_size: u32,
}

/// Entry point for the host application.
pub struct RideCoordinator {
    connection: ConnectionManager,
    backend: Arc<dyn RideBackend>,
    cache: Arc<ActiveRideCache>,
    offers: OfferController,
    matching: Arc<MatchTracker>,
    tracking: Arc<RideTracker>,
    reconciler: Reconciler,
    notifications: broadcast::Sender<NotificationFrame>,
    role: Mutex<Option<Role>>,
}

impl RideCoordinator {
    /// Assemble from explicit parts.
    pub fn new(parts: CoordinatorParts) -> Self {
        let CoordinatorParts {
            connection,
            backend,
            cache,
            clock,
            offers,
            page_size,
        } = parts;
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            offers: OfferController::new(Arc::clone(&backend), Arc::clone(&cache), clock, offers),
            matching: Arc::new(MatchTracker::new(Arc::clone(&cache))),
            tracking: Arc::new(RideTracker::new(Arc::clone(&cache))),
            reconciler: Reconciler::new(Arc::clone(&backend), Arc::clone(&cache), page_size),
            connection,
            backend,
            cache,
            notifications,
            role: Mutex::new(None),
        }
    }

    /// Production wiring: WebSocket broker, HTTP backend, file cache.
    pub fn from_settings(settings: &PillionSettings, credentials: Arc<dyn CredentialProvider>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::new(CoordinatorParts {
            connection: ConnectionManager::websocket(settings.broker.clone(), Arc::clone(&credentials)),
            backend: Arc::new(HttpRideBackend::new(&settings.api, credentials)),
            cache: Arc::new(ActiveRideCache::from_settings(&settings.cache, Arc::clone(&clock))),
            clock,
            offers: settings.offers.clone(),
            page_size: settings.api.page_size,
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Connect as `role` and subscribe to its topics.
    ///
    /// Also resumes tracking of the cached ride, if any.
    pub async fn go_online(&self, role: Role) -> Result<(), CoordinatorError> {
        *self.role.lock() = Some(role);
        info!(?role, "going online");
        self.connection.connect().await?;
        self.subscribe_role(role)?;
        let Some(record) = self.cache.load() else {
            return Ok(());
        };
        match record.ride_id {
            Some(ride_id) => {
                let _ = self.track_ride(ride_id)?;
            }
            None if role == Role::Rider && !self.matching.state().is_terminal() => {
                self.matching.begin(record.request_id);
            }
            None => {}
        }
        Ok(())
    }

    /// Withdraw presented offers, stop matching and close the session.
    /// The active ride cache is kept.
    pub async fn go_offline(&self) {
        let role = self.role.lock().take();
        info!(?role, "going offline");
        self.offers.clear();
        self.matching.reset();
        self.connection.disconnect().await;
    }

    /// Rebuild after an app-lifecycle resume: reconnect, resubscribe and
    /// reconcile with the backend.
    ///
    /// A reconciliation failure is logged and reported as `None`; the
    /// cached record is then used as-is.
    pub async fn resume(&self) -> Result<Option<ReconcileOutcome>, CoordinatorError> {
        let role = (*self.role.lock()).ok_or(CoordinatorError::Offline)?;
        let outcome = match self.reconciler.reconcile(role).await {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                warn!(?role, %error, "resume without reconciliation");
                None
            }
        };
        self.go_online(role).await?;
        Ok(outcome)
    }

    /// Subscribe to live updates for `ride_id`. Re-subscribing replaces the
    /// earlier handler. The subscription ends by itself once the ride
    /// finishes.
    pub fn track_ride(&self, ride_id: RideId) -> Result<SubscriptionKey, CoordinatorError> {
        let topic = Topic::RideTracking(ride_id.clone());
        let key = topic.natural_key();
        let finished_key = key.clone();
        let tracker = Arc::clone(&self.tracking);
        let connection = self.connection.clone();
        let key = self.connection.subscribe(
            topic,
            move |event| {
                let BrokerEvent::Tracking(frame) = event else {
                    return;
                };
                if tracker.handle(&ride_id, frame) == TrackingOutcome::Finished {
                    info!(%ride_id, "tracked ride finished");
                    if let Some(key) = &finished_key {
                        let _ = connection.unsubscribe(key);
                    }
                }
            },
            key,
        )?;
        Ok(key)
    }

    /// Cancel the rider's open request.
    pub async fn cancel_active_request(&self) -> Result<RequestId, CoordinatorError> {
        let request_id = self
            .matching
            .state()
            .request_id()
            .cloned()
            .or_else(|| self.cache.load().and_then(|r| r.request_id))
            .ok_or(CoordinatorError::NoActiveRequest)?;
        self.backend.cancel_request(&request_id).await?;
        info!(%request_id, "request cancelled");
        if !self.matching.cancel() {
            self.cache.clear();
        }
        Ok(request_id)
    }

    fn subscribe_role(&self, role: Role) -> Result<(), CoordinatorError> {
        match role {
            Role::Driver => {
                let offers = self.offers.clone();
                let _ = self.connection.subscribe(
                    Topic::DriverOffers,
                    move |event| {
                        if let BrokerEvent::Offer(frame) = event {
                            let _ = offers.receive(frame);
                        }
                    },
                    Some(SubscriptionKey::from(DRIVER_OFFERS_KEY)),
                )?;
            }
            Role::Rider => {
                let matching = Arc::clone(&self.matching);
                let _ = self.connection.subscribe(
                    Topic::RiderMatching,
                    move |event| {
                        if let BrokerEvent::Matching(frame) = event {
                            let _ = matching.handle(frame);
                        }
                    },
                    Some(SubscriptionKey::from(RIDER_MATCHING_KEY)),
                )?;
            }
        }

        let notifications = self.notifications.clone();
        let _ = self.connection.subscribe(
            Topic::Notifications,
            move |event| {
                if let BrokerEvent::Notification(frame) = event {
                    let _ = notifications.send(frame);
                }
            },
            Some(SubscriptionKey::from(NOTIFICATIONS_KEY)),
        )?;
        Ok(())
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// Current role, `None` while offline.
    pub fn role(&self) -> Option<Role> {
        *self.role.lock()
    }

    /// The broker session.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Driver offers.
    pub fn offers(&self) -> &OfferController {
        &self.offers
    }

    /// Rider matching.
    pub fn matching(&self) -> &MatchTracker {
        &self.matching
    }

    /// Ride tracking.
    pub fn tracking(&self) -> &RideTracker {
        &self.tracking
    }

    /// Active ride cache.
    pub fn cache(&self) -> &ActiveRideCache {
        &self.cache
    }

    /// User notifications received on the session.
    pub fn notifications(&self) -> broadcast::Receiver<NotificationFrame> {
        self.notifications.subscribe()
    }
}
