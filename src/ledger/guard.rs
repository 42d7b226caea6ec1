use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::DedupLedger;
use crate::models::OrderId;

/// Owns one orchestration's `InFlight` marking.
///
/// Resolve it with [`InFlightGuard::release`] (clear back to `Pending`) or
/// [`InFlightGuard::disarm`] (the order settled). A guard dropped while still armed, for
/// example because the surrounding future was cancelled mid-commit, schedules the clear on
/// the current runtime.
pub struct InFlightGuard {
    ledger: Arc<dyn DedupLedger>,
    order_id: OrderId,
    armed: bool,
}

impl InFlightGuard {
    pub fn new(ledger: Arc<dyn DedupLedger>, order_id: OrderId) -> Self {
        Self {
            ledger,
            order_id,
            armed: true,
        }
    }

    pub async fn release(mut self) {
        match self.ledger.clear(&self.order_id).await {
            Ok(()) => self.armed = false,
            Err(err) => {
                warn!(order_id = %self.order_id, error = %err, "Failed to clear in-flight marking");
            }
        }
    }

    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let ledger = Arc::clone(&self.ledger);
        let order_id = self.order_id.clone();
        match Handle::try_current() {
            Ok(handle) => {
                debug!(%order_id, "Clearing abandoned in-flight marking");
                let mut pending = PendingClear {
                    order_id,
                    done: false,
                };
                handle.spawn(async move {
                    let result = ledger.clear(&pending.order_id).await;
                    pending.done = true;
                    if let Err(err) = result {
                        warn!(order_id = %pending.order_id, error = %err, "Deferred in-flight clear failed");
                    }
                });
            }
            Err(_) => {
                warn!(%order_id, "No runtime available to clear in-flight marking; clear it manually");
            }
        }
    }
}

/// Travels with a deferred clear. A runtime shutting down drops spawned tasks without
/// polling them to completion, which would otherwise lose the clear silently.
struct PendingClear {
    order_id: OrderId,
    done: bool,
}

impl Drop for PendingClear {
    fn drop(&mut self) {
        if !self.done {
            warn!(
                order_id = %self.order_id,
                "Runtime shut down before the in-flight clear ran; clear it manually"
            );
        }
    }
}
