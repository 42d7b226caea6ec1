use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::{Validate, ValidationError};

/// Reservation identifier assigned by the booking backend.
pub type ReservationId = i64;

fn validate_positive_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("range");
        err.message = Some("Amount must be greater than 0".into());
        Err(err)
    }
}

fn validate_non_negative_decimal(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("range");
        err.message = Some("Amount must not be negative".into());
        Err(err)
    } else {
        Ok(())
    }
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("required");
        err.message = Some("Value must not be blank".into());
        Err(err)
    } else {
        Ok(())
    }
}

fn validate_order_id(value: &OrderId) -> Result<(), ValidationError> {
    validate_not_blank(value.as_str())
}

/// Idempotency key of one checkout attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for OrderId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Proof of payment delivered by the gateway redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProof {
    /// Gateway transaction reference (`paymentKey`)
    #[validate(custom = "validate_not_blank")]
    pub payment_key: String,
    #[validate(custom = "validate_order_id")]
    pub order_id: OrderId,
    #[validate(custom = "validate_positive_decimal")]
    pub amount: Decimal,
}

impl PaymentProof {
    pub fn new(payment_key: impl Into<String>, order_id: impl Into<OrderId>, amount: Decimal) -> Self {
        Self {
            payment_key: payment_key.into(),
            order_id: order_id.into(),
            amount,
        }
    }
}

/// Reservation request assembled by the booking flow before the customer leaves for the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SettlementDraft {
    #[validate(custom = "validate_order_id")]
    pub order_id: OrderId,
    #[validate(length(min = 1))]
    pub stylist_id: String,
    #[validate(length(min = 1))]
    pub service_id: String,
    pub reservation_date: NaiveDate,
    pub reservation_time: NaiveTime,
    #[validate(custom = "validate_non_negative_decimal")]
    pub requested_price: Decimal,
    #[serde(default)]
    pub used_points: u32,
    #[serde(default)]
    pub coupon_id: Option<String>,
    /// Amount the customer was asked to pay; the gateway proof must match it exactly.
    #[validate(custom = "validate_positive_decimal")]
    pub quoted_amount: Decimal,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DedupState {
    Pending,
    InFlight,
    Settled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub state: DedupState,
    pub reservation_id: Option<ReservationId>,
    pub updated_at: DateTime<Utc>,
}

impl DedupRecord {
    pub fn pending() -> Self {
        Self {
            state: DedupState::Pending,
            reservation_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn in_flight() -> Self {
        Self {
            state: DedupState::InFlight,
            reservation_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn settled(reservation_id: ReservationId) -> Self {
        Self {
            state: DedupState::Settled,
            reservation_id: Some(reservation_id),
            updated_at: Utc::now(),
        }
    }

    /// Reservation id if, and only if, the order is settled.
    pub fn settled_reservation(&self) -> Option<ReservationId> {
        match self.state {
            DedupState::Settled => self.reservation_id,
            _ => None,
        }
    }
}

/// Status of a payment as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayPaymentStatus {
    Pending,
    Done,
    Failed,
}

impl GatewayPaymentStatus {
    /// Maps the gateway's own status vocabulary. Unrecognised values are treated as pending
    /// so they never trigger a terminal failure.
    pub fn from_gateway(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DONE" => Self::Done,
            "CANCELED" | "PARTIAL_CANCELED" | "ABORTED" | "EXPIRED" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Why a settlement ended in a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "code", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    #[error("invalid payment proof: {0}")]
    InvalidProof(String),

    #[error("paid amount {received} does not match quoted amount {expected}")]
    AmountMismatch { expected: Decimal, received: Decimal },

    #[error("amount rejected by settlement endpoint: {0}")]
    AmountRejected(String),

    #[error("no reservation draft is pending for this order")]
    DraftMissing,

    #[error("payment was not approved by the gateway")]
    PaymentNotApproved,

    #[error("{0}")]
    GatewayRejected(String),

    #[error("settlement failed: {0}")]
    Unclassified(String),
}

impl FailureReason {
    /// Validation-class failures keep the draft: the proof was bad, not the reservation request.
    pub fn discards_draft(&self) -> bool {
        matches!(
            self,
            Self::PaymentNotApproved | Self::GatewayRejected(_) | Self::Unclassified(_)
        )
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementOutcome {
    Settled {
        #[serde(rename = "reservationId")]
        reservation_id: ReservationId,
    },
    RetryLater,
    Failed {
        reason: FailureReason,
    },
}

impl SettlementOutcome {
    pub fn settled(reservation_id: ReservationId) -> Self {
        Self::Settled { reservation_id }
    }

    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed { reason }
    }
}

/// Body sent to the settlement commit endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub payment_key: String,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub draft: SettlementDraft,
}

impl CommitRequest {
    pub fn new(proof: &PaymentProof, draft: SettlementDraft) -> Self {
        Self {
            payment_key: proof.payment_key.clone(),
            order_id: proof.order_id.clone(),
            amount: proof.amount,
            draft,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReceipt {
    pub reservation_id: ReservationId,
}
