// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Combinators deriving one promise from many.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cell::Promise;
use crate::error::Error;
use crate::runtime::{Deferred, Runtime};

/// Fulfills with every input's value, in input order, once all inputs
/// fulfill. Rejects with the first rejection observed; the other inputs
/// keep running and their outcomes are dropped.
///
/// No inputs fulfills at once with an empty vector.
pub fn all<T, E, I>(runtime: &Runtime, promises: I) -> Promise<Vec<T>, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<_> = promises.into_iter().collect();
    let Deferred {
        promise,
        resolve,
        reject,
    } = runtime.deferred();
    if promises.is_empty() {
        resolve.fulfill(Vec::new());
        return promise;
    }

    let gather = Rc::new(RefCell::new(Gather {
        values: vec![None; promises.len()],
        remaining: promises.len(),
    }));
    for (index, input) in promises.iter().enumerate() {
        let gather = gather.clone();
        let resolve = resolve.clone();
        let reject = reject.clone();
        input.subscribe(
            move |value| {
                let finished = gather.borrow_mut().store(index, value);
                if let Some(values) = finished {
                    resolve.fulfill(values);
                }
            },
            move |reason| reject.reject(reason),
        );
    }
    promise
}

struct Gather<T> {
    values: Vec<Option<T>>,
    remaining: usize,
}

impl<T> Gather<T> {
    /// Record one value. Returns the full vector once the last one lands.
    fn store(&mut self, index: usize, value: T) -> Option<Vec<T>> {
        self.values[index] = Some(value);
        self.remaining -= 1;
        if self.remaining > 0 {
            return None;
        }
        Some(self.values.drain(..).flatten().collect())
    }
}

/// Adopts the outcome of whichever input settles first.
///
/// No inputs never settles.
pub fn race<T, E, I>(runtime: &Runtime, promises: I) -> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let Deferred {
        promise,
        resolve,
        reject,
    } = runtime.deferred();
    for input in promises {
        let resolve = resolve.clone();
        let reject = reject.clone();
        input.subscribe(
            move |value| resolve.fulfill(value),
            move |reason| reject.reject(reason),
        );
    }
    promise
}
