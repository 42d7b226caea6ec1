use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::DedupLedger;
use crate::errors::ServiceError;
use crate::models::{DedupRecord, DedupState, OrderId, ReservationId};

/// Process-wide ledger. Clones share the same table; the DashMap shard lock held by the
/// entry API makes each transition atomic per order.
#[derive(Clone, Default)]
pub struct InMemoryLedger(Arc<DashMap<OrderId, DedupRecord>>);

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[async_trait]
impl DedupLedger for InMemoryLedger {
    async fn lookup(&self, order_id: &OrderId) -> Result<Option<DedupRecord>, ServiceError> {
        Ok(self.0.get(order_id).map(|record| record.clone()))
    }

    async fn begin(&self, order_id: &OrderId) -> Result<DedupRecord, ServiceError> {
        let record = self
            .0
            .entry(order_id.clone())
            .or_insert_with(DedupRecord::pending);
        Ok(record.clone())
    }

    async fn mark_in_flight(&self, order_id: &OrderId) -> Result<bool, ServiceError> {
        let acquired = match self.0.entry(order_id.clone()) {
            Entry::Occupied(mut entry) => match entry.get().state {
                DedupState::Pending => {
                    entry.insert(DedupRecord::in_flight());
                    true
                }
                DedupState::InFlight | DedupState::Settled => false,
            },
            Entry::Vacant(entry) => {
                entry.insert(DedupRecord::in_flight());
                true
            }
        };
        debug!(%order_id, acquired, "In-flight guard requested");
        Ok(acquired)
    }

    async fn mark_settled(
        &self,
        order_id: &OrderId,
        reservation_id: ReservationId,
    ) -> Result<(), ServiceError> {
        self.0
            .insert(order_id.clone(), DedupRecord::settled(reservation_id));
        Ok(())
    }

    async fn clear(&self, order_id: &OrderId) -> Result<(), ServiceError> {
        if let Some(mut record) = self.0.get_mut(order_id) {
            if record.state == DedupState::InFlight {
                *record = DedupRecord::pending();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    #[tokio::test]
    async fn begin_creates_pending_once() {
        let ledger = InMemoryLedger::new();
        let order = OrderId::from("ORD-1");

        let first = ledger.begin(&order).await.unwrap();
        assert_eq!(first.state, DedupState::Pending);

        ledger.mark_settled(&order, 77).await.unwrap();
        let second = ledger.begin(&order).await.unwrap();
        assert_eq!(second.settled_reservation(), Some(77));
    }

    #[tokio::test]
    async fn guard_is_exclusive_until_cleared() {
        let ledger = InMemoryLedger::new();
        let order = OrderId::from("ORD-1");

        assert!(ledger.mark_in_flight(&order).await.unwrap());
        assert!(!ledger.mark_in_flight(&order).await.unwrap());

        ledger.clear(&order).await.unwrap();
        assert_eq!(
            ledger.lookup(&order).await.unwrap().map(|r| r.state),
            Some(DedupState::Pending)
        );
        assert!(ledger.mark_in_flight(&order).await.unwrap());
    }

    #[tokio::test]
    async fn clear_never_unsettles() {
        let ledger = InMemoryLedger::new();
        let order = OrderId::from("ORD-2");

        ledger.mark_settled(&order, 9).await.unwrap();
        ledger.clear(&order).await.unwrap();

        let record = ledger.lookup(&order).await.unwrap().unwrap();
        assert_eq!(record.settled_reservation(), Some(9));
        assert!(!ledger.mark_in_flight(&order).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_guards_admit_exactly_one() {
        let ledger = InMemoryLedger::new();
        let order = OrderId::from("ORD-RACE");

        let attempts = (0..32).map(|_| {
            let ledger = ledger.clone();
            let order = order.clone();
            tokio::spawn(async move { ledger.mark_in_flight(&order).await.unwrap() })
        });
        let acquired = join_all(attempts)
            .await
            .into_iter()
            .filter(|result| matches!(result, Ok(true)))
            .count();

        assert_eq!(acquired, 1);
    }

    #[tokio::test]
    async fn unrelated_orders_are_independent() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.mark_in_flight(&OrderId::from("A")).await.unwrap());
        assert!(ledger.mark_in_flight(&OrderId::from("B")).await.unwrap());
        assert_eq!(ledger.len(), 2);
    }
}
