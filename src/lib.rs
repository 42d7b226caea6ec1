//! Salon Settlement Library
//!
//! Exactly-once settlement of salon reservation payments: a dedup ledger, the settlement
//! orchestrator that reconciles gateway callbacks against it, and the HTTP callback surface.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod clients;
pub mod config;
pub mod drafts;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod retry;
pub mod services;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clients::{ReservationApiClient, TossGatewayClient};
use crate::config::{LedgerBackend, SettlementConfig};
use crate::drafts::{DraftStore, InMemoryDraftStore, RedisDraftStore};
use crate::errors::ServiceError;
use crate::ledger::LedgerFactory;
use crate::services::{SettlementOrchestrator, SettlementPoller};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: SettlementConfig,
    pub drafts: Arc<dyn DraftStore>,
    pub poller: Arc<SettlementPoller>,
    /// Cancelled on shutdown; every callback runs under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: SettlementConfig,
        drafts: Arc<dyn DraftStore>,
        poller: Arc<SettlementPoller>,
    ) -> Self {
        Self {
            config,
            drafts,
            poller,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wires the configured storage backend and the HTTP clients.
    pub async fn from_config(config: SettlementConfig) -> Result<Self, ServiceError> {
        let ledger = LedgerFactory::create(&config).await?;

        let drafts: Arc<dyn DraftStore> = match config.ledger_backend() {
            LedgerBackend::InMemory => Arc::new(InMemoryDraftStore::new()),
            LedgerBackend::Redis => Arc::new(
                RedisDraftStore::connect(
                    &config.redis_url,
                    config.ledger_namespace.clone(),
                    config.draft_ttl(),
                )
                .await?,
            ),
        };

        let gateway = Arc::new(TossGatewayClient::new(
            &config.gateway_base_url,
            &config.gateway_secret_key,
            config.call_timeout(),
        )?);
        let backend = Arc::new(ReservationApiClient::new(
            &config.api_base_url,
            config.api_token.clone(),
            config.call_timeout(),
        )?);

        let orchestrator = SettlementOrchestrator::new(
            ledger,
            Arc::clone(&drafts),
            gateway,
            backend.clone(),
            backend,
        )
        .with_call_timeout(config.call_timeout())
        .with_read_retry(config.retry_config());

        let poller = Arc::new(SettlementPoller::new(
            Arc::new(orchestrator),
            config.poll_config(),
        ));

        info!(
            backend = %config.ledger_backend(),
            poll_max_attempts = config.poll_max_attempts,
            "Settlement services initialized"
        );
        Ok(Self::new(config, drafts, poller))
    }
}
