//! Seams to the external endpoints a settlement talks to.
//!
//! The orchestrator only sees these traits; production wires in the HTTP clients from
//! [`http`], tests substitute fakes.

use async_trait::async_trait;

use crate::errors::{CommitError, ServiceError};
use crate::models::{CommitReceipt, CommitRequest, GatewayPaymentStatus, OrderId, ReservationId};

pub mod http;

pub use http::{ReservationApiClient, TossGatewayClient};

/// Read-only payment status query against the payment gateway.
#[async_trait]
pub trait GatewayStatusQuery: Send + Sync {
    async fn payment_status(&self, payment_key: &str) -> Result<GatewayPaymentStatus, ServiceError>;
}

/// Read-only lookup of a reservation already created for an order.
#[async_trait]
pub trait ReservationLookup: Send + Sync {
    async fn find_by_order(&self, order_id: &OrderId) -> Result<Option<ReservationId>, ServiceError>;
}

/// The non-idempotent call that confirms the payment and creates the reservation.
#[async_trait]
pub trait SettlementCommit: Send + Sync {
    async fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, CommitError>;
}
