//! Storage for reservation drafts awaiting payment.
//!
//! A draft is written by the booking flow before the customer is redirected to the gateway
//! and read back when the proof of payment arrives. Drafts survive validation-class failures
//! so the customer can retry; they are discarded once the order is settled or definitively
//! rejected.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::{OrderId, SettlementDraft};

#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Validates and stores the draft, replacing any previous draft for the same order.
    async fn save(&self, draft: SettlementDraft) -> Result<(), ServiceError>;

    async fn load(&self, order_id: &OrderId) -> Result<Option<SettlementDraft>, ServiceError>;

    /// Removes the draft. Discarding a missing draft is not an error.
    async fn discard(&self, order_id: &OrderId) -> Result<(), ServiceError>;
}

#[derive(Clone, Default)]
pub struct InMemoryDraftStore(Arc<DashMap<OrderId, SettlementDraft>>);

impl InMemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DraftStore for InMemoryDraftStore {
    async fn save(&self, draft: SettlementDraft) -> Result<(), ServiceError> {
        draft.validate()?;
        self.0.insert(draft.order_id.clone(), draft);
        Ok(())
    }

    async fn load(&self, order_id: &OrderId) -> Result<Option<SettlementDraft>, ServiceError> {
        Ok(self.0.get(order_id).map(|draft| draft.clone()))
    }

    async fn discard(&self, order_id: &OrderId) -> Result<(), ServiceError> {
        self.0.remove(order_id);
        Ok(())
    }
}

fn store_error(err: redis::RedisError) -> ServiceError {
    ServiceError::DraftStoreError(err.to_string())
}

/// Drafts kept as JSON strings at `{namespace}:draft:{orderId}` with a TTL, so abandoned
/// checkouts age out on their own.
#[derive(Clone)]
pub struct RedisDraftStore {
    conn: ConnectionManager,
    namespace: String,
    ttl: Duration,
}

impl RedisDraftStore {
    pub async fn connect(
        url: &str,
        namespace: impl Into<String>,
        ttl: Duration,
    ) -> Result<Self, ServiceError> {
        let client = redis::Client::open(url).map_err(store_error)?;
        let conn = ConnectionManager::new(client).await.map_err(store_error)?;
        Ok(Self {
            conn,
            namespace: namespace.into(),
            ttl,
        })
    }

    fn key(&self, order_id: &OrderId) -> String {
        format!("{}:draft:{}", self.namespace, order_id)
    }
}

#[async_trait]
impl DraftStore for RedisDraftStore {
    #[instrument(skip(self, draft), fields(order_id = %draft.order_id))]
    async fn save(&self, draft: SettlementDraft) -> Result<(), ServiceError> {
        draft.validate()?;
        let json = serde_json::to_string(&draft)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(self.key(&draft.order_id), json, self.ttl.as_secs() as usize)
            .await
            .map_err(store_error)?;
        debug!(ttl_secs = self.ttl.as_secs(), "Draft stored");
        Ok(())
    }

    async fn load(&self, order_id: &OrderId) -> Result<Option<SettlementDraft>, ServiceError> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(self.key(order_id)).await.map_err(store_error)?;
        json.map(|raw| serde_json::from_str(&raw).map_err(ServiceError::from))
            .transpose()
    }

    async fn discard(&self, order_id: &OrderId) -> Result<(), ServiceError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(order_id))
            .await
            .map_err(store_error)
    }
}
