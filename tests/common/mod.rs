#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;

use salon_settlement::{
    clients::{GatewayStatusQuery, ReservationLookup, SettlementCommit},
    config::SettlementConfig,
    drafts::{DraftStore, InMemoryDraftStore},
    errors::{CommitError, ServiceError},
    handlers,
    ledger::{DedupLedger, InMemoryLedger},
    models::{
        CommitReceipt, CommitRequest, DedupState, GatewayPaymentStatus, OrderId, PaymentProof,
        ReservationId, SettlementDraft,
    },
    retry::RetryConfig,
    services::{PollConfig, SettlementOrchestrator, SettlementPoller},
    AppState,
};

pub const FIRST_RESERVATION_ID: ReservationId = 77;

/// How the fake booking backend answers a commit.
#[derive(Debug, Clone)]
pub enum CommitBehavior {
    Succeed,
    AlreadyInProgress,
    /// Persists the reservation, then stalls past any reasonable client timeout.
    StallAfterPersist(Duration),
    AmountMismatch(String),
    Reject(String),
    Unknown(String),
}

/// Payment gateway stand-in with a settable status.
pub struct FakeGateway {
    status: Mutex<GatewayPaymentStatus>,
    pub calls: AtomicU32,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(GatewayPaymentStatus::Pending),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_status(&self, status: GatewayPaymentStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl GatewayStatusQuery for FakeGateway {
    async fn payment_status(&self, _payment_key: &str) -> Result<GatewayPaymentStatus, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.status.lock().unwrap())
    }
}

/// Booking backend stand-in: remembers reservations per order and counts every call.
pub struct FakeBackend {
    reservations: DashMap<OrderId, ReservationId>,
    next_id: AtomicI64,
    behavior: Mutex<CommitBehavior>,
    commit_delay: Mutex<Duration>,
    lookup_failures: AtomicU32,
    pub commit_calls: AtomicU32,
    pub lookup_calls: AtomicU32,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
            next_id: AtomicI64::new(FIRST_RESERVATION_ID),
            behavior: Mutex::new(CommitBehavior::Succeed),
            commit_delay: Mutex::new(Duration::ZERO),
            lookup_failures: AtomicU32::new(0),
            commit_calls: AtomicU32::new(0),
            lookup_calls: AtomicU32::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: CommitBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn set_commit_delay(&self, delay: Duration) {
        *self.commit_delay.lock().unwrap() = delay;
    }

    /// The next `count` lookups fail with a connection error.
    pub fn fail_lookups(&self, count: u32) {
        self.lookup_failures.store(count, Ordering::SeqCst);
    }

    /// A reservation created out of band, e.g. by another service instance.
    pub fn insert_reservation(&self, order_id: &str, reservation_id: ReservationId) {
        self.reservations.insert(OrderId::from(order_id), reservation_id);
    }

    pub fn commits(&self) -> u32 {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> u32 {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    fn persist(&self, order_id: &OrderId) -> ReservationId {
        *self
            .reservations
            .entry(order_id.clone())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ReservationLookup for FakeBackend {
    async fn find_by_order(&self, order_id: &OrderId) -> Result<Option<ReservationId>, ServiceError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .lookup_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ServiceError::ExternalServiceError("connection reset".into()));
        }
        Ok(self.reservations.get(order_id).map(|id| *id))
    }
}

#[async_trait]
impl SettlementCommit for FakeBackend {
    async fn commit(&self, request: &CommitRequest) -> Result<CommitReceipt, CommitError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.commit_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            CommitBehavior::Succeed => Ok(CommitReceipt {
                reservation_id: self.persist(&request.order_id),
            }),
            CommitBehavior::AlreadyInProgress => Err(CommitError::AlreadyInProgress),
            CommitBehavior::StallAfterPersist(stall) => {
                let reservation_id = self.persist(&request.order_id);
                tokio::time::sleep(stall).await;
                Ok(CommitReceipt { reservation_id })
            }
            CommitBehavior::AmountMismatch(message) => Err(CommitError::AmountMismatch(message)),
            CommitBehavior::Reject(message) => Err(CommitError::GatewayRejected(message)),
            CommitBehavior::Unknown(message) => Err(CommitError::Unknown(message)),
        }
    }
}

pub fn draft(order_id: &str, quoted_amount: Decimal) -> SettlementDraft {
    SettlementDraft {
        order_id: OrderId::from(order_id),
        stylist_id: "stylist-3".into(),
        service_id: "cut-basic".into(),
        reservation_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        reservation_time: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        requested_price: quoted_amount,
        used_points: 0,
        coupon_id: None,
        quoted_amount,
    }
}

pub fn proof(order_id: &str, amount: Decimal) -> PaymentProof {
    PaymentProof::new(format!("pk_{}", order_id), order_id, amount)
}

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_factor: 2.0,
    }
}

/// Orchestrator wired to in-memory storage and fake endpoints.
pub struct Harness {
    pub ledger: InMemoryLedger,
    pub drafts: InMemoryDraftStore,
    pub gateway: Arc<FakeGateway>,
    pub backend: Arc<FakeBackend>,
    pub orchestrator: Arc<SettlementOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_call_timeout(Duration::from_millis(500))
    }

    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        let ledger = InMemoryLedger::new();
        let drafts = InMemoryDraftStore::new();
        let gateway = Arc::new(FakeGateway::new());
        let backend = Arc::new(FakeBackend::new());

        let orchestrator = SettlementOrchestrator::new(
            Arc::new(ledger.clone()),
            Arc::new(drafts.clone()),
            gateway.clone(),
            backend.clone(),
            backend.clone(),
        )
        .with_call_timeout(call_timeout)
        .with_read_retry(fast_retry());

        Self {
            ledger,
            drafts,
            gateway,
            backend,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub async fn with_draft(self, order_id: &str, quoted_amount: Decimal) -> Self {
        self.drafts.save(draft(order_id, quoted_amount)).await.unwrap();
        self
    }

    pub fn poller(&self, max_attempts: u32, delay: Duration) -> Arc<SettlementPoller> {
        Arc::new(SettlementPoller::new(
            self.orchestrator.clone(),
            PollConfig { max_attempts, delay },
        ))
    }

    pub async fn ledger_state(&self, order_id: &str) -> Option<DedupState> {
        self.ledger
            .lookup(&OrderId::from(order_id))
            .await
            .unwrap()
            .map(|record| record.state)
    }

    pub async fn has_draft(&self, order_id: &str) -> bool {
        self.drafts
            .load(&OrderId::from(order_id))
            .await
            .unwrap()
            .is_some()
    }
}

/// Router over a [`Harness`], driven with `oneshot`.
pub struct TestApp {
    router: Router,
    pub harness: Harness,
}

impl TestApp {
    pub fn new(harness: Harness, poll: PollConfig) -> Self {
        let config = SettlementConfig::new(
            "test_sk_local".into(),
            "http://127.0.0.1:9".into(),
            "test".into(),
        );
        let poller = Arc::new(SettlementPoller::new(harness.orchestrator.clone(), poll));
        let drafts: Arc<dyn DraftStore> = Arc::new(harness.drafts.clone());
        let state = AppState::new(config, drafts, poller);

        Self {
            router: handlers::router(state),
            harness,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        });
        (status, json)
    }
}
