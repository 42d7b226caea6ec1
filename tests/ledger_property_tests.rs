//! Property-based tests for the dedup ledger.
//!
//! Random operation sequences are applied both to the in-memory ledger and to a plain
//! state model; every result and the final state must agree.

use proptest::prelude::*;
use std::collections::HashMap;

use salon_settlement::ledger::{DedupLedger, InMemoryLedger};
use salon_settlement::models::{DedupState, OrderId, ReservationId};

#[derive(Debug, Clone)]
enum Op {
    Begin(u8),
    MarkInFlight(u8),
    MarkSettled(u8, ReservationId),
    Clear(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let order = 0u8..3;
    prop_oneof![
        order.clone().prop_map(Op::Begin),
        order.clone().prop_map(Op::MarkInFlight),
        (order.clone(), 1i64..1_000).prop_map(|(o, id)| Op::MarkSettled(o, id)),
        order.prop_map(Op::Clear),
    ]
}

fn order_id(n: u8) -> OrderId {
    OrderId::new(format!("ORD-{}", n))
}

#[derive(Default)]
struct Model(HashMap<u8, (DedupState, Option<ReservationId>)>);

impl Model {
    fn mark_in_flight(&mut self, order: u8) -> bool {
        match self.0.get(&order) {
            None | Some((DedupState::Pending, _)) => {
                self.0.insert(order, (DedupState::InFlight, None));
                true
            }
            _ => false,
        }
    }

    fn apply(&mut self, op: &Op) -> Option<bool> {
        match *op {
            Op::Begin(o) => {
                self.0.entry(o).or_insert((DedupState::Pending, None));
                None
            }
            Op::MarkInFlight(o) => Some(self.mark_in_flight(o)),
            Op::MarkSettled(o, id) => {
                self.0.insert(o, (DedupState::Settled, Some(id)));
                None
            }
            Op::Clear(o) => {
                if let Some(entry) = self.0.get_mut(&o) {
                    if entry.0 == DedupState::InFlight {
                        *entry = (DedupState::Pending, None);
                    }
                }
                None
            }
        }
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn ledger_matches_state_model(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let rt = runtime();
        let ledger = InMemoryLedger::new();
        let mut model = Model::default();

        for op in &ops {
            let expected = model.apply(op);
            let actual = rt.block_on(async {
                match *op {
                    Op::Begin(o) => {
                        ledger.begin(&order_id(o)).await.unwrap();
                        None
                    }
                    Op::MarkInFlight(o) => Some(ledger.mark_in_flight(&order_id(o)).await.unwrap()),
                    Op::MarkSettled(o, id) => {
                        ledger.mark_settled(&order_id(o), id).await.unwrap();
                        None
                    }
                    Op::Clear(o) => {
                        ledger.clear(&order_id(o)).await.unwrap();
                        None
                    }
                }
            });
            prop_assert_eq!(actual, expected, "diverged at {:?}", op);
        }

        for o in 0u8..3 {
            let record = rt.block_on(ledger.lookup(&order_id(o))).unwrap();
            let actual = record.map(|r| (r.state, r.reservation_id));
            prop_assert_eq!(actual, model.0.get(&o).copied());
        }
    }

    #[test]
    fn settled_orders_stay_settled(
        id in 1i64..1_000,
        ops in prop::collection::vec(prop_oneof![Just(0u8), Just(1u8), Just(2u8)], 0..20),
    ) {
        let rt = runtime();
        let ledger = InMemoryLedger::new();
        let order = order_id(0);
        rt.block_on(ledger.mark_settled(&order, id)).unwrap();

        for step in ops {
            let acquired = rt.block_on(async {
                match step {
                    0 => ledger.begin(&order).await.map(|_| false),
                    1 => ledger.mark_in_flight(&order).await,
                    _ => ledger.clear(&order).await.map(|_| false),
                }
            })
            .unwrap();
            prop_assert!(!acquired, "settled order re-entered flight");
        }

        let record = rt.block_on(ledger.lookup(&order)).unwrap().unwrap();
        prop_assert_eq!(record.settled_reservation(), Some(id));
    }
}
