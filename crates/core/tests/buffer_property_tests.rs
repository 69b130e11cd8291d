//! Property-based tests for the liquidation buffer.
//!
//! However pushes and failed writes interleave, every liquidation reaches
//! the store exactly once and in arrival order.

mod common;

use std::sync::Arc;

use perpflow_core::daemon::LiquidationBuffer;
use perpflow_core::InMemoryRecordStore;
use perpflow_market_data::{Liquidation, Record, Venue};
use proptest::prelude::*;

use common::liquidation;

#[derive(Clone, Debug)]
enum Step {
    Push(usize),
    Flush { fail: bool },
}

fn arb_steps() -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(
        prop_oneof![
            3 => (1usize..8).prop_map(Step::Push),
            1 => any::<bool>().prop_map(|fail| Step::Flush { fail }),
        ],
        1..30,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn nothing_is_lost_or_reordered(steps in arb_steps(), threshold in 1usize..10) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let store = Arc::new(InMemoryRecordStore::new());
        let buffer = LiquidationBuffer::new(threshold);
        let mut pushed: Vec<Liquidation> = Vec::new();

        for step in steps {
            match step {
                Step::Push(count) => {
                    for _ in 0..count {
                        let event = liquidation(Venue::Binance, pushed.len() as i64);
                        let signalled = buffer.push(event.clone());
                        pushed.push(event);
                        prop_assert_eq!(signalled, buffer.len() >= threshold);
                    }
                }
                Step::Flush { fail } => {
                    store.set_fail_writes(fail);
                    let before = buffer.len();
                    let outcome = runtime.block_on(buffer.flush(store.as_ref()));
                    if fail && before > 0 {
                        prop_assert!(outcome.is_err());
                        prop_assert_eq!(buffer.len(), before);
                    } else {
                        prop_assert_eq!(outcome.unwrap(), before);
                        prop_assert!(buffer.is_empty());
                    }
                }
            }
        }

        store.set_fail_writes(false);
        runtime.block_on(buffer.flush(store.as_ref())).unwrap();
        let expected: Vec<Record> = pushed.into_iter().map(Record::from).collect();
        prop_assert_eq!(store.records(), expected);
    }
}
