use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{GatewayStatusQuery, ReservationLookup, SettlementCommit};
use crate::errors::{CommitError, ServiceError};
use crate::models::{CommitReceipt, CommitRequest, GatewayPaymentStatus, OrderId, ReservationId};

#[derive(Debug, Deserialize)]
struct PaymentStatusBody {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReservationBody {
    reservation_id: ReservationId,
}

/// Error envelope shared by the gateway and the reservation backend.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ServiceError::ConfigError(format!("failed to build HTTP client: {}", e)))
}

fn parse_base_url(base_url: &str) -> Result<Url, ServiceError> {
    let url = Url::parse(base_url)
        .map_err(|e| ServiceError::ConfigError(format!("invalid base URL '{}': {}", base_url, e)))?;
    if url.cannot_be_a_base() {
        return Err(ServiceError::ConfigError(format!(
            "base URL '{}' cannot carry a path",
            base_url
        )));
    }
    Ok(url)
}

/// Appends `segments` to `base`, percent-encoding each one so caller-supplied ids
/// stay inside a single path segment.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn transport_error(operation: &str, err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Timeout(operation.to_string())
    } else {
        ServiceError::ExternalServiceError(format!("{}: {}", operation, err))
    }
}

/// Maps a non-success status on a read-only call. Server-side failures are transport-class
/// and may be retried; client errors are not.
fn status_error(operation: &str, status: StatusCode) -> ServiceError {
    if status.is_server_error() {
        ServiceError::ExternalServiceError(format!("{} returned {}", operation, status))
    } else {
        ServiceError::ExternalApiError(format!("{} returned {}", operation, status))
    }
}

/// Classifies a failed commit response from its status and raw body.
pub fn classify_commit_failure(status: StatusCode, body: &str) -> CommitError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) => match err.code.as_str() {
            "ALREADY_PROCESSING_REQUEST" | "ALREADY_IN_PROGRESS" => CommitError::AlreadyInProgress,
            "AMOUNT_MISMATCH" | "INVALID_AMOUNT" => CommitError::AmountMismatch(err.message),
            _ if status.is_client_error() => CommitError::GatewayRejected(err.message),
            _ => CommitError::Unknown(format!("{} {}: {}", status, err.code, err.message)),
        },
        Err(_) => match status {
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                CommitError::Transport(ServiceError::ExternalServiceError(format!(
                    "settlement commit returned {}",
                    status
                )))
            }
            _ => CommitError::Unknown(format!("settlement commit returned {}", status)),
        },
    }
}

/// Payment status queries against the Toss Payments API.
#[derive(Clone)]
pub struct TossGatewayClient {
    client: reqwest::Client,
    base_url: Url,
    authorization: String,
}

impl TossGatewayClient {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: parse_base_url(base_url)?,
            authorization: format!("Basic {}", STANDARD.encode(format!("{}:", secret_key))),
        })
    }
}

#[async_trait]
impl GatewayStatusQuery for TossGatewayClient {
    #[instrument(skip(self))]
    async fn payment_status(&self, payment_key: &str) -> Result<GatewayPaymentStatus, ServiceError> {
        let url = endpoint(&self.base_url, &["v1", "payments", payment_key]);
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| transport_error("gateway status", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error("gateway status", status));
        }

        let body: PaymentStatusBody = response
            .json()
            .await
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        debug!(gateway_status = %body.status, "Gateway status received");
        Ok(GatewayPaymentStatus::from_gateway(&body.status))
    }
}

/// Reservation lookup and settlement commit against the booking backend.
#[derive(Clone)]
pub struct ReservationApiClient {
    client: reqwest::Client,
    base_url: Url,
    api_token: Option<String>,
}

impl ReservationApiClient {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: parse_base_url(base_url)?,
            api_token: api_token.filter(|token| !token.is_empty()),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ReservationLookup for ReservationApiClient {
    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn find_by_order(&self, order_id: &OrderId) -> Result<Option<ReservationId>, ServiceError> {
        let url = endpoint(
            &self.base_url,
            &["api", "reservations", "by-order", order_id.as_str()],
        );
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| transport_error("reservation lookup", e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: ReservationBody = response
                    .json()
                    .await
                    .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
                Ok(Some(body.reservation_id))
            }
            status => Err(status_error("reservation lookup", status)),
        }
    }
}

#[async_trait]
impl SettlementCommit for ReservationApiClient {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, CommitError> {
        let url = endpoint(&self.base_url, &["api", "payments", "confirm"]);
        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await
            .map_err(|e| CommitError::Transport(transport_error("settlement commit", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CommitError::Transport(transport_error("settlement commit body", e)))?;

        if status.is_success() {
            // The reservation exists at this point; an unreadable body leaves the id unknown.
            return serde_json::from_str::<CommitReceipt>(&body)
                .map_err(|e| CommitError::Transport(ServiceError::SerializationError(e.to_string())));
        }

        let err = classify_commit_failure(status, &body);
        warn!(%status, error = %err, "Settlement commit failed");
        Err(err)
    }
}
