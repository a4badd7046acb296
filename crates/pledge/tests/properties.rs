// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Property tests: settlement is monotonic and every registered
//! continuation fires exactly once, whatever the interleaving.

use std::cell::RefCell;
use std::rc::Rc;

use pledge::{Config, Error, Runtime, Settle, State};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Fulfill(i32),
    Reject(String),
    Then,
    Turn,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<i32>().prop_map(Op::Fulfill),
        "[a-z]{1,6}".prop_map(Op::Reject),
        Just(Op::Then),
        Just(Op::Turn),
    ]
}

proptest! {
    #[test]
    fn first_settlement_wins_and_handlers_fire_once(ops in prop::collection::vec(op(), 1..48)) {
        let (rt, ev) = Runtime::event_loop(&Config::default());
        let d = rt.deferred::<i32, Error>();
        let hits: Rc<RefCell<Vec<u32>>> = Rc::new(RefCell::new(Vec::new()));
        let mut expected: Option<Result<i32, Error>> = None;

        for op in &ops {
            match op {
                Op::Fulfill(v) => {
                    d.resolve.fulfill(*v);
                    expected.get_or_insert(Ok(*v));
                }
                Op::Reject(reason) => {
                    d.reject.reject(Error::rejected(reason.clone()));
                    expected.get_or_insert(Err(Error::rejected(reason.clone())));
                }
                Op::Then => {
                    let index = hits.borrow().len();
                    hits.borrow_mut().push(0);
                    let on_value = hits.clone();
                    let on_reason = hits.clone();
                    let _ = d.promise.then(
                        move |v| {
                            on_value.borrow_mut()[index] += 1;
                            Ok(Settle::Value(v))
                        },
                        move |e| {
                            on_reason.borrow_mut()[index] += 1;
                            Err(e)
                        },
                    );
                }
                Op::Turn => {
                    ev.turn();
                }
            }
            prop_assert_eq!(d.promise.outcome(), expected.clone());
        }

        ev.run_until_idle().unwrap();
        prop_assert_eq!(d.promise.outcome(), expected.clone());
        let want = if expected.is_some() { 1 } else { 0 };
        for count in hits.borrow().iter() {
            prop_assert_eq!(*count, want);
        }
    }

    #[test]
    fn all_preserves_order_regardless_of_settle_order(
        order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let (rt, ev) = Runtime::event_loop(&Config::default());
        let inputs: Vec<_> = (0..8).map(|_| rt.deferred::<usize, Error>()).collect();
        let combined = rt.all(inputs.iter().map(|d| d.promise.clone()));

        for &i in &order {
            inputs[i].resolve.fulfill(i * 10);
            ev.turn();
        }
        ev.run_until_idle().unwrap();

        prop_assert_eq!(combined.state(), State::Fulfilled);
        prop_assert_eq!(
            combined.outcome(),
            Some(Ok((0..8).map(|i| i * 10).collect::<Vec<_>>()))
        );
    }
}
