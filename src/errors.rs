use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error body returned by the HTTP surface
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Bad Request", "Service Unavailable")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("Draft store error: {0}")]
    DraftStoreError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Whether the failure happened on the wire rather than in a classified response.
    /// Only these are retried on read-only calls; during a commit they mean "outcome unknown".
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::ExternalServiceError(_) | Self::Timeout(_))
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ExternalServiceError(_) | Self::ExternalApiError(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::LedgerError(_) | Self::DraftStoreError(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::SerializationError(_) | Self::ConfigError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Storage and internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::LedgerError(_) | Self::DraftStoreError(_) => {
                "Settlement storage temporarily unavailable".to_string()
            }
            Self::SerializationError(_) | Self::ConfigError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// Classified failure of the settlement commit endpoint.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("amount rejected by commit endpoint: {0}")]
    AmountMismatch(String),

    #[error("another settlement attempt is already in progress")]
    AlreadyInProgress,

    #[error("payment rejected by gateway: {0}")]
    GatewayRejected(String),

    #[error("unclassified commit failure: {0}")]
    Unknown(String),

    /// The request may or may not have reached the server.
    #[error("commit outcome unknown: {0}")]
    Transport(ServiceError),
}
