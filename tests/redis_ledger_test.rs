//! Runs against a live Redis (`REDIS_URL`, default `redis://127.0.0.1:6379`).
//! Enable with `--features redis-tests`.
#![cfg(feature = "redis-tests")]

use std::time::Duration;

use chrono::{NaiveDate, NaiveTime, Utc};
use futures::future::join_all;
use rust_decimal_macros::dec;

use salon_settlement::drafts::{DraftStore, RedisDraftStore};
use salon_settlement::ledger::{DedupLedger, RedisLedger};
use salon_settlement::models::{DedupState, OrderId, SettlementDraft};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn namespace() -> String {
    format!(
        "salon:test:{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

#[tokio::test]
async fn transitions_follow_the_state_machine() {
    let ledger = RedisLedger::connect(&redis_url(), namespace()).await.unwrap();
    let order = OrderId::from("ORD-1");

    assert!(ledger.lookup(&order).await.unwrap().is_none());
    assert_eq!(ledger.begin(&order).await.unwrap().state, DedupState::Pending);

    assert!(ledger.mark_in_flight(&order).await.unwrap());
    assert!(!ledger.mark_in_flight(&order).await.unwrap());

    ledger.clear(&order).await.unwrap();
    assert_eq!(
        ledger.lookup(&order).await.unwrap().map(|r| r.state),
        Some(DedupState::Pending)
    );

    ledger.mark_settled(&order, 77).await.unwrap();
    ledger.clear(&order).await.unwrap();
    let record = ledger.begin(&order).await.unwrap();
    assert_eq!(record.settled_reservation(), Some(77));
}

#[tokio::test]
async fn guard_is_exclusive_across_connections() {
    let ns = namespace();
    let order = OrderId::from("ORD-RACE");

    let mut ledgers = Vec::new();
    for _ in 0..8 {
        ledgers.push(RedisLedger::connect(&redis_url(), ns.clone()).await.unwrap());
    }

    let attempts = ledgers.iter().map(|ledger| ledger.mark_in_flight(&order));
    let acquired = join_all(attempts)
        .await
        .into_iter()
        .filter(|result| matches!(result, Ok(true)))
        .count();

    assert_eq!(acquired, 1);
}

#[tokio::test]
async fn drafts_round_trip_as_json() {
    let store = RedisDraftStore::connect(&redis_url(), namespace(), Duration::from_secs(120))
        .await
        .unwrap();
    let draft = SettlementDraft {
        order_id: OrderId::from("ORD-2"),
        stylist_id: "stylist-3".into(),
        service_id: "cut-basic".into(),
        reservation_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        reservation_time: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        requested_price: dec!(55000),
        used_points: 5000,
        coupon_id: Some("WELCOME10".into()),
        quoted_amount: dec!(50000),
    };

    store.save(draft.clone()).await.unwrap();
    assert_eq!(store.load(&draft.order_id).await.unwrap(), Some(draft.clone()));

    store.discard(&draft.order_id).await.unwrap();
    assert_eq!(store.load(&draft.order_id).await.unwrap(), None);
}
