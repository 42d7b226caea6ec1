use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, instrument, warn};

use super::settlement_orchestrator::SettlementOrchestrator;
use crate::errors::ServiceError;
use crate::models::{FailureReason, PaymentProof, ReservationId, SettlementOutcome};

const DELAYED_MESSAGE: &str = "processing delayed, check your account";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Reconciliation passes before giving up, including the first
    pub max_attempts: u32,
    /// Fixed wait after each `RetryLater`
    pub delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

/// What the caller of a settlement finally sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollOutcome {
    Settled {
        #[serde(rename = "reservationId")]
        reservation_id: ReservationId,
        attempts: u32,
    },
    Failed {
        reason: FailureReason,
        message: String,
    },
    /// Still unresolved after the last attempt. Not an error: the payment may well have gone
    /// through and support follows up.
    Delayed { attempts: u32, message: String },
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    fn delayed(attempts: u32) -> Self {
        Self::Delayed {
            attempts,
            message: DELAYED_MESSAGE.to_string(),
        }
    }

    fn failed(reason: FailureReason) -> Self {
        Self::Failed {
            message: reason.to_string(),
            reason,
        }
    }
}

/// Caller-side retry loop around [`SettlementOrchestrator::reconcile`].
pub struct SettlementPoller {
    orchestrator: Arc<SettlementOrchestrator>,
    config: PollConfig,
}

impl SettlementPoller {
    pub fn new(orchestrator: Arc<SettlementOrchestrator>, config: PollConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Reconciles until the order resolves, the attempt cap is reached or `cancel` fires.
    /// Cancelling drops the pass in progress, which releases any in-flight marking it held.
    #[instrument(skip(self, proof, cancel), fields(order_id = %proof.order_id))]
    pub async fn run(&self, proof: &PaymentProof, cancel: &CancellationToken) -> PollOutcome {
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled { attempts: attempt - 1 },
                outcome = self.orchestrator.reconcile(proof) => outcome,
            };

            match outcome {
                SettlementOutcome::Settled { reservation_id } => {
                    info!(reservation_id, attempt, "Settlement resolved");
                    return PollOutcome::Settled {
                        reservation_id,
                        attempts: attempt,
                    };
                }
                SettlementOutcome::Failed { reason } => return PollOutcome::failed(reason),
                SettlementOutcome::RetryLater => {
                    debug!(attempt, "Settlement not resolved yet");
                }
            }

            if attempt < max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return PollOutcome::Cancelled { attempts: attempt },
                    _ = tokio::time::sleep(self.config.delay) => {}
                }
            }
        }

        warn!(attempts = max_attempts, "Settlement still unresolved; reporting delay");
        PollOutcome::delayed(max_attempts)
    }

    /// Runs the loop on its own task. Dropping the returned handle cancels it.
    pub fn spawn(self: Arc<Self>, proof: PaymentProof, parent: &CancellationToken) -> PollHandle {
        let cancel = parent.child_token();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move { self.run(&proof, &task_cancel).await });
        PollHandle {
            join,
            guard: Some(cancel.drop_guard()),
        }
    }
}

/// A spawned settlement loop.
pub struct PollHandle {
    join: JoinHandle<PollOutcome>,
    guard: Option<DropGuard>,
}

impl PollHandle {
    pub fn cancel(&mut self) {
        self.guard.take();
    }

    pub async fn outcome(mut self) -> Result<PollOutcome, ServiceError> {
        let result = (&mut self.join).await;
        if let Some(guard) = self.guard.take() {
            guard.disarm();
        }
        result.map_err(|e| ServiceError::InternalError(format!("settlement task failed: {}", e)))
    }
}
