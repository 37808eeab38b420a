//! REST implementation of [`RideBackend`] using `reqwest`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pillion_core::normalize::Payload;
use pillion_core::{OfferKind, RequestId, RideId, RideSummary};
use pillion_realtime::CredentialProvider;
use pillion_settings::ApiSettings;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{AcceptReceipt, InFlightQuery, RideBackend};
use crate::errors::BackendError;
use crate::offer::Offer;

const RIDE_ID_FIELDS: &[&str] = &["rideId", "ride.id", "sharedRideId"];
const REQUEST_ID_FIELDS: &[&str] = &["requestId", "rideRequestId", "joinRequestId", "id"];
const STATUS_FIELDS: &[&str] = &["status", "requestStatus", "rideStatus"];

/// Ride backend over HTTP+JSON with bearer authentication.
pub struct HttpRideBackend {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpRideBackend {
    /// Client for `settings.base_url`. The credential provider is asked for
    /// a token on every call.
    pub fn new(settings: &ApiSettings, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(settings.request_timeout_ms))
                .user_agent(concat!("pillion/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn authorized(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, BackendError> {
        match self.credentials.credential().await {
            Ok(Some(token)) => Ok(builder.bearer_auth(token)),
            Ok(None) => Ok(builder),
            Err(e) => {
                warn!(error = %e, "no credential for backend call");
                Err(BackendError::Unauthorized)
            }
        }
    }

    /// Send, check the status, and parse the body. An empty body is `Null`.
    async fn execute(&self, builder: reqwest::RequestBuilder) -> Result<Value, BackendError> {
        let response = self
            .authorized(builder)
            .await?
            .send()
            .await
            .map_err(|e| BackendError::Network(format!("HTTP request failed: {e}")))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Network(format!("failed to read response body: {e}")))?;

        if status == 401 || status == 403 {
            return Err(BackendError::Unauthorized);
        }
        if !(200..300).contains(&status) {
            return Err(BackendError::Status {
                status,
                message: error_message(&body),
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, BackendError> {
        debug!(path, "backend POST");
        self.execute(self.client.post(self.url(path)).json(&body)).await
    }
}

fn request_id(offer: &Offer) -> Result<&RequestId, BackendError> {
    offer
        .request_id
        .as_ref()
        .ok_or(BackendError::MissingIdentifier("requestId"))
}

fn ride_id(offer: &Offer) -> Result<&RideId, BackendError> {
    offer
        .ride_id
        .as_ref()
        .ok_or(BackendError::MissingIdentifier("rideId"))
}

/// Pull a human-readable message out of an error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            Payload::new(&v)
                .ok()
                .and_then(|p| p.text(&["message", "error", "detail"]))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Build a receipt from the response, falling back to the offer's own IDs.
fn receipt(value: &Value, offer: &Offer) -> AcceptReceipt {
    let payload = Payload::new(value)
        .ok()
        .map(|p| p.nested("data").unwrap_or(p));
    let field = |candidates: &[&str]| payload.and_then(|p| p.id(candidates));
    AcceptReceipt {
        ride_id: field(RIDE_ID_FIELDS)
            .map(RideId::from)
            .or_else(|| offer.ride_id.clone()),
        request_id: field(REQUEST_ID_FIELDS)
            .map(RequestId::from)
            .or_else(|| offer.request_id.clone()),
        status: payload.and_then(|p| p.status(STATUS_FIELDS)),
    }
}

/// The list inside a page response: `{content: [...]}`, `{data: [...]}`,
/// `{data: {content: [...]}}` or a bare array.
fn page_items(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => ["content", "data", "items"]
            .iter()
            .filter_map(|k| map.get(*k))
            .find_map(page_items),
        _ => None,
    }
}

#[async_trait]
impl RideBackend for HttpRideBackend {
    async fn accept_direct(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError> {
        let id = request_id(offer)?;
        let body = json!({ "offerId": offer.offer_id });
        let value = self
            .post(&format!("/api/v1/ride-requests/{id}/accept"), body)
            .await?;
        Ok(receipt(&value, offer))
    }

    async fn accept_broadcast(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError> {
        let id = request_id(offer)?;
        let value = self
            .post(&format!("/api/v1/ride-requests/{id}/claim"), json!({}))
            .await?;
        Ok(receipt(&value, offer))
    }

    async fn accept_join(&self, offer: &Offer) -> Result<AcceptReceipt, BackendError> {
        let ride = ride_id(offer)?;
        let id = request_id(offer)?;
        let value = self
            .post(
                &format!("/api/v1/shared-rides/{ride}/join-requests/{id}/approve"),
                json!({}),
            )
            .await?;
        Ok(receipt(&value, offer))
    }

    async fn reject_offer(&self, offer: &Offer, reason: &str) -> Result<(), BackendError> {
        let id = request_id(offer)?;
        let path = match offer.kind {
            OfferKind::JoinRequest => {
                let ride = ride_id(offer)?;
                format!("/api/v1/shared-rides/{ride}/join-requests/{id}/reject")
            }
            OfferKind::DirectAssignment | OfferKind::OpenBroadcast => {
                format!("/api/v1/ride-requests/{id}/reject")
            }
        };
        let _ = self.post(&path, json!({ "reason": reason })).await?;
        Ok(())
    }

    async fn cancel_request(&self, request_id: &RequestId) -> Result<(), BackendError> {
        let _ = self
            .post(&format!("/api/v1/ride-requests/{request_id}/cancel"), json!({}))
            .await?;
        Ok(())
    }

    async fn in_flight_requests(
        &self,
        query: &InFlightQuery,
    ) -> Result<Vec<RideSummary>, BackendError> {
        let builder = self.client.get(self.url("/api/v1/ride-requests")).query(&[
            ("role", query.role.as_query().to_string()),
            ("status", query.status.clone()),
            ("page", query.page.to_string()),
            ("size", query.size.to_string()),
        ]);
        let value = self.execute(builder).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        let items = page_items(&value)
            .ok_or_else(|| BackendError::Decode("response holds no request list".into()))?;

        Ok(items
            .iter()
            .filter_map(|item| match RideSummary::from_value(item, query.role) {
                Ok(summary) => Some(summary),
                Err(error) => {
                    warn!(%error, "skipping undecodable in-flight request");
                    None
                }
            })
            .collect())
    }
}
