use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::clients::{GatewayStatusQuery, ReservationLookup, SettlementCommit};
use crate::drafts::DraftStore;
use crate::errors::{CommitError, ServiceError};
use crate::ledger::{DedupLedger, InFlightGuard};
use crate::models::{
    CommitRequest, FailureReason, GatewayPaymentStatus, OrderId, PaymentProof, ReservationId,
    SettlementOutcome,
};
use crate::retry::{with_retry, RetryConfig, TransportRetryPolicy};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

async fn timed<T, F>(limit: Duration, operation: &'static str, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    timeout(limit, call)
        .await
        .map_err(|_| ServiceError::Timeout(operation.to_string()))?
}

/// Turns a payment proof into exactly one reservation.
///
/// A pass short-circuits at the first step that resolves the order:
/// ledger fast path, reservation recovery, gateway status, then the guarded commit.
/// Everything before the commit is read-only, so a pass can be repeated freely; the commit
/// runs only while this pass holds the order's `InFlight` marking.
pub struct SettlementOrchestrator {
    ledger: Arc<dyn DedupLedger>,
    drafts: Arc<dyn DraftStore>,
    gateway: Arc<dyn GatewayStatusQuery>,
    reservations: Arc<dyn ReservationLookup>,
    committer: Arc<dyn SettlementCommit>,
    call_timeout: Duration,
    read_retry: RetryConfig,
}

impl SettlementOrchestrator {
    pub fn new(
        ledger: Arc<dyn DedupLedger>,
        drafts: Arc<dyn DraftStore>,
        gateway: Arc<dyn GatewayStatusQuery>,
        reservations: Arc<dyn ReservationLookup>,
        committer: Arc<dyn SettlementCommit>,
    ) -> Self {
        Self {
            ledger,
            drafts,
            gateway,
            reservations,
            committer,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            read_retry: RetryConfig::default(),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_read_retry(mut self, read_retry: RetryConfig) -> Self {
        self.read_retry = read_retry;
        self
    }

    /// Runs one reconciliation pass for the proof.
    #[instrument(skip(self, proof), fields(order_id = %proof.order_id))]
    pub async fn reconcile(&self, proof: &PaymentProof) -> SettlementOutcome {
        if let Err(errors) = proof.validate() {
            warn!(error = %errors, "Rejecting malformed payment proof");
            return SettlementOutcome::failed(FailureReason::InvalidProof(errors.to_string()));
        }
        let order_id = &proof.order_id;

        match self.ledger.lookup(order_id).await {
            Ok(Some(record)) => {
                if let Some(reservation_id) = record.settled_reservation() {
                    debug!(reservation_id, "Order already settled");
                    return SettlementOutcome::settled(reservation_id);
                }
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "Ledger lookup failed; continuing with recovery"),
        }

        match self.ledger.begin(order_id).await {
            Ok(record) => {
                if let Some(reservation_id) = record.settled_reservation() {
                    return SettlementOutcome::settled(reservation_id);
                }
            }
            Err(err) => {
                warn!(error = %err, "Could not record settlement attempt");
                return SettlementOutcome::RetryLater;
            }
        }

        let draft = match self.drafts.load(order_id).await {
            Ok(draft) => draft,
            Err(err) => {
                warn!(error = %err, "Draft store unavailable");
                return SettlementOutcome::RetryLater;
            }
        };

        if let Some(draft) = &draft {
            if draft.quoted_amount != proof.amount {
                return self
                    .fail(
                        order_id,
                        FailureReason::AmountMismatch {
                            expected: draft.quoted_amount,
                            received: proof.amount,
                        },
                    )
                    .await;
            }
        }

        match self.find_reservation(order_id).await {
            Ok(Some(reservation_id)) => {
                info!(reservation_id, "Recovered existing reservation");
                return self.settle(order_id, reservation_id).await.0;
            }
            Ok(None) => {}
            Err(err) => {
                warn!(error = %err, "Reservation lookup failed");
                return SettlementOutcome::RetryLater;
            }
        }

        match self.payment_status(&proof.payment_key).await {
            Ok(GatewayPaymentStatus::Done) => {
                // The gateway already approved; only a lookup may resolve this, never a commit.
                return match self.find_reservation(order_id).await {
                    Ok(Some(reservation_id)) => self.settle(order_id, reservation_id).await.0,
                    Ok(None) => {
                        info!("Payment approved but reservation not visible yet");
                        SettlementOutcome::RetryLater
                    }
                    Err(err) => {
                        warn!(error = %err, "Reservation lookup failed");
                        SettlementOutcome::RetryLater
                    }
                };
            }
            Ok(GatewayPaymentStatus::Failed) => {
                return self.fail(order_id, FailureReason::PaymentNotApproved).await;
            }
            Ok(GatewayPaymentStatus::Pending) => {}
            Err(err) => {
                warn!(error = %err, "Gateway status query failed");
                return SettlementOutcome::RetryLater;
            }
        }

        let Some(draft) = draft else {
            return self.fail(order_id, FailureReason::DraftMissing).await;
        };

        match self.ledger.mark_in_flight(order_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Another attempt holds the in-flight marking");
                return SettlementOutcome::RetryLater;
            }
            Err(err) => {
                warn!(error = %err, "Could not acquire in-flight marking");
                return SettlementOutcome::RetryLater;
            }
        }
        let guard = InFlightGuard::new(Arc::clone(&self.ledger), order_id.clone());

        let request = CommitRequest::new(proof, draft);
        let result = match timeout(self.call_timeout, self.committer.commit(&request)).await {
            Ok(result) => result,
            Err(_) => Err(CommitError::Transport(ServiceError::Timeout(
                "settlement commit".to_string(),
            ))),
        };

        match result {
            Ok(receipt) => {
                let (outcome, recorded) = self.settle(order_id, receipt.reservation_id).await;
                if recorded {
                    guard.disarm();
                } else {
                    guard.release().await;
                }
                info!(reservation_id = receipt.reservation_id, "Settlement committed");
                outcome
            }
            Err(CommitError::AlreadyInProgress) => {
                guard.release().await;
                debug!("Commit endpoint reports an attempt in progress");
                SettlementOutcome::RetryLater
            }
            Err(CommitError::Transport(err)) => {
                guard.release().await;
                warn!(error = %err, "Commit outcome unknown; recovery runs on the next pass");
                SettlementOutcome::RetryLater
            }
            Err(CommitError::AmountMismatch(message)) => {
                guard.release().await;
                self.fail(order_id, FailureReason::AmountRejected(message)).await
            }
            Err(CommitError::GatewayRejected(message)) => {
                guard.release().await;
                self.fail(order_id, FailureReason::GatewayRejected(message)).await
            }
            Err(CommitError::Unknown(message)) => {
                guard.release().await;
                self.fail(order_id, FailureReason::Unclassified(message)).await
            }
        }
    }

    async fn find_reservation(&self, order_id: &OrderId) -> Result<Option<ReservationId>, ServiceError> {
        let this = self;
        with_retry(&self.read_retry, TransportRetryPolicy, move || {
            timed(
                this.call_timeout,
                "reservation lookup",
                this.reservations.find_by_order(order_id),
            )
        })
        .await
    }

    async fn payment_status(&self, payment_key: &str) -> Result<GatewayPaymentStatus, ServiceError> {
        let this = self;
        with_retry(&self.read_retry, TransportRetryPolicy, move || {
            timed(
                this.call_timeout,
                "gateway status",
                this.gateway.payment_status(payment_key),
            )
        })
        .await
    }

    /// Records the reservation and consumes the draft. The flag reports whether the ledger
    /// write went through.
    async fn settle(&self, order_id: &OrderId, reservation_id: ReservationId) -> (SettlementOutcome, bool) {
        let recorded = match self.ledger.mark_settled(order_id, reservation_id).await {
            Ok(()) => true,
            Err(err) => {
                warn!(reservation_id, error = %err, "Failed to record settlement");
                false
            }
        };

        if let Err(err) = self.drafts.discard(order_id).await {
            warn!(error = %err, "Failed to discard settled draft");
        }

        (SettlementOutcome::settled(reservation_id), recorded)
    }

    async fn fail(&self, order_id: &OrderId, reason: FailureReason) -> SettlementOutcome {
        if reason.discards_draft() {
            if let Err(err) = self.drafts.discard(order_id).await {
                warn!(error = %err, "Failed to discard rejected draft");
            }
        }
        warn!(reason = %reason, "Settlement failed");
        SettlementOutcome::failed(reason)
    }
}
