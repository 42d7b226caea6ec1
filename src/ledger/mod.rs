//! Dedup ledger: the per-order record of settlement progress.
//!
//! Every transition is atomic per `orderId`. `mark_in_flight` is the guard that keeps the
//! settlement commit endpoint to a single outstanding call per order, so backends must
//! implement it as a compare-and-set, never as a read followed by a write.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::config::{LedgerBackend, SettlementConfig};
use crate::errors::ServiceError;
use crate::models::{DedupRecord, OrderId, ReservationId};

mod guard;
mod memory;
mod redis;

pub use guard::InFlightGuard;
pub use memory::InMemoryLedger;
pub use self::redis::RedisLedger;

#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// Current record for the order, if any.
    async fn lookup(&self, order_id: &OrderId) -> Result<Option<DedupRecord>, ServiceError>;

    /// Creates a `Pending` record when none exists and returns the record now stored.
    async fn begin(&self, order_id: &OrderId) -> Result<DedupRecord, ServiceError>;

    /// `absent | Pending -> InFlight`. Returns `false` without touching the record when it is
    /// already `InFlight` or `Settled`.
    async fn mark_in_flight(&self, order_id: &OrderId) -> Result<bool, ServiceError>;

    /// Records the reservation created for the order. Idempotent.
    async fn mark_settled(
        &self,
        order_id: &OrderId,
        reservation_id: ReservationId,
    ) -> Result<(), ServiceError>;

    /// `InFlight -> Pending`. A settled record is left untouched.
    async fn clear(&self, order_id: &OrderId) -> Result<(), ServiceError>;
}

pub struct LedgerFactory;

impl LedgerFactory {
    /// Builds the ledger selected by `ledger_backend`.
    pub async fn create(config: &SettlementConfig) -> Result<Arc<dyn DedupLedger>, ServiceError> {
        let backend = config.ledger_backend();
        info!(%backend, namespace = %config.ledger_namespace, "Initializing dedup ledger");
        match backend {
            LedgerBackend::InMemory => Ok(Arc::new(InMemoryLedger::new())),
            LedgerBackend::Redis => Ok(Arc::new(
                RedisLedger::connect(&config.redis_url, config.ledger_namespace.clone()).await?,
            )),
        }
    }
}
