//! Reconciliation of the active ride cache against the backend.
//!
//! The backend is authoritative whenever it is reachable: the first status
//! bucket (in role-specific priority order) that holds a request overwrites
//! the cache, and if every bucket is empty the cache is cleared even when
//! it held something. When the backend cannot be reached the cache is left
//! exactly as it was.

use std::sync::Arc;

use pillion_core::{RideSummary, Role};
use tracing::{debug, info, warn};

use crate::backend::{InFlightQuery, RideBackend};
use crate::cache::{ActiveRideCache, ActiveRidePatch};
use crate::errors::BackendError;

const DRIVER_PRIORITY: &[&str] = &["ONGOING", "ACCEPTED"];
const RIDER_PRIORITY: &[&str] = &["ONGOING", "ACCEPTED", "PENDING"];

/// Statuses queried for `role`, highest priority first.
pub fn status_priority(role: Role) -> &'static [&'static str] {
    match role {
        Role::Driver => DRIVER_PRIORITY,
        Role::Rider => RIDER_PRIORITY,
    }
}

/// Result of a successful reconciliation.
#[derive(Clone, Debug, PartialEq)]
pub enum ReconcileOutcome {
    /// The backend reported this request; the cache now mirrors it.
    Restored(RideSummary),
    /// The backend reported nothing; the cache was cleared.
    Cleared,
}

/// Queries the backend and rewrites the cache.
pub struct Reconciler {
    backend: Arc<dyn RideBackend>,
    cache: Arc<ActiveRideCache>,
    page_size: u32,
}

impl Reconciler {
    /// Reconciler querying `page_size` items per status.
    pub fn new(backend: Arc<dyn RideBackend>, cache: Arc<ActiveRideCache>, page_size: u32) -> Self {
        Self {
            backend,
            cache,
            page_size: page_size.max(1),
        }
    }

    /// Reconcile the cache for `role`.
    pub async fn reconcile(&self, role: Role) -> Result<ReconcileOutcome, BackendError> {
        for status in status_priority(role) {
            let query = InFlightQuery::first_page(role, *status, self.page_size);
            let page = match self.backend.in_flight_requests(&query).await {
                Ok(page) => page,
                Err(error) => {
                    warn!(?role, status, %error, "reconciliation aborted; cache left untouched");
                    return Err(error);
                }
            };
            debug!(?role, status, count = page.len(), "in-flight query");

            let Some(summary) = page
                .into_iter()
                .find(|s| s.ride_id.is_some() || s.request_id.is_some())
            else {
                continue;
            };

            let mut patch = ActiveRidePatch::from_summary(&summary, role);
            if patch.status.is_none() {
                patch.status = Some((*status).to_string());
            }
            let _ = self.cache.replace(patch);
            info!(
                ?role,
                status,
                ride_id = ?summary.ride_id,
                request_id = ?summary.request_id,
                "active ride restored from backend"
            );
            return Ok(ReconcileOutcome::Restored(summary));
        }

        info!(?role, "no in-flight request; clearing active ride");
        self.cache.clear();
        Ok(ReconcileOutcome::Cleared)
    }
}
