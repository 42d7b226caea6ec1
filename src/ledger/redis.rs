use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, instrument};

use super::DedupLedger;
use crate::errors::ServiceError;
use crate::models::{DedupRecord, DedupState, OrderId, ReservationId};

const BEGIN_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  redis.call('HSET', KEYS[1], 'state', 'pending', 'updated_at', ARGV[1])
end
return redis.call('HGETALL', KEYS[1])
";

const MARK_IN_FLIGHT_SCRIPT: &str = r"
local state = redis.call('HGET', KEYS[1], 'state')
if state == false or state == 'pending' then
  redis.call('HSET', KEYS[1], 'state', 'in_flight', 'updated_at', ARGV[1])
  return 1
end
return 0
";

const CLEAR_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], 'state') == 'in_flight' then
  redis.call('HSET', KEYS[1], 'state', 'pending', 'updated_at', ARGV[1])
  return 1
end
return 0
";

fn ledger_error(err: redis::RedisError) -> ServiceError {
    ServiceError::LedgerError(err.to_string())
}

/// Ledger shared between service instances. Each order is a hash at `{namespace}:{orderId}`;
/// conditional transitions run as Lua scripts so they are atomic on the server.
#[derive(Clone)]
pub struct RedisLedger {
    conn: ConnectionManager,
    namespace: String,
    begin: Script,
    mark_in_flight: Script,
    clear: Script,
}

impl RedisLedger {
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self, ServiceError> {
        let client = redis::Client::open(url).map_err(ledger_error)?;
        let conn = ConnectionManager::new(client).await.map_err(ledger_error)?;
        Ok(Self::with_connection(conn, namespace))
    }

    pub fn with_connection(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
            begin: Script::new(BEGIN_SCRIPT),
            mark_in_flight: Script::new(MARK_IN_FLIGHT_SCRIPT),
            clear: Script::new(CLEAR_SCRIPT),
        }
    }

    fn key(&self, order_id: &OrderId) -> String {
        format!("{}:{}", self.namespace, order_id)
    }
}

/// Decodes a stored hash. An empty hash means no record.
fn decode_record(fields: HashMap<String, String>) -> Result<Option<DedupRecord>, ServiceError> {
    if fields.is_empty() {
        return Ok(None);
    }

    let state = fields
        .get("state")
        .ok_or_else(|| ServiceError::LedgerError("record without state".to_string()))
        .and_then(|raw| {
            DedupState::from_str(raw)
                .map_err(|_| ServiceError::LedgerError(format!("unknown state '{}'", raw)))
        })?;

    let reservation_id = fields
        .get("reservation_id")
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            raw.parse::<ReservationId>()
                .map_err(|e| ServiceError::LedgerError(format!("bad reservation_id: {}", e)))
        })
        .transpose()?;

    let updated_at = fields
        .get("updated_at")
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(Some(DedupRecord {
        state,
        reservation_id,
        updated_at,
    }))
}

#[async_trait]
impl DedupLedger for RedisLedger {
    async fn lookup(&self, order_id: &OrderId) -> Result<Option<DedupRecord>, ServiceError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.key(order_id))
            .await
            .map_err(ledger_error)?;
        decode_record(fields)
    }

    async fn begin(&self, order_id: &OrderId) -> Result<DedupRecord, ServiceError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = self
            .begin
            .key(self.key(order_id))
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(ledger_error)?;
        decode_record(fields)?
            .ok_or_else(|| ServiceError::LedgerError(format!("begin left no record for {}", order_id)))
    }

    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn mark_in_flight(&self, order_id: &OrderId) -> Result<bool, ServiceError> {
        let mut conn = self.conn.clone();
        let acquired: i32 = self
            .mark_in_flight
            .key(self.key(order_id))
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(ledger_error)?;
        debug!(acquired = acquired == 1, "In-flight guard requested");
        Ok(acquired == 1)
    }

    async fn mark_settled(
        &self,
        order_id: &OrderId,
        reservation_id: ReservationId,
    ) -> Result<(), ServiceError> {
        let mut conn = self.conn.clone();
        let fields = [
            ("state", DedupState::Settled.to_string()),
            ("reservation_id", reservation_id.to_string()),
            ("updated_at", Utc::now().to_rfc3339()),
        ];
        conn.hset_multiple::<_, _, _, ()>(self.key(order_id), &fields[..])
            .await
            .map_err(ledger_error)
    }

    async fn clear(&self, order_id: &OrderId) -> Result<(), ServiceError> {
        let mut conn = self.conn.clone();
        let _: i32 = self
            .clear
            .key(self.key(order_id))
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await
            .map_err(ledger_error)?;
        Ok(())
    }
}
