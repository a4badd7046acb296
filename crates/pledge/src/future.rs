// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! `std::future` bridge so a promise can be awaited.

use std::cell::RefCell;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::cell::Promise;
use crate::error::Error;

/// Future over a promise's outcome.
///
/// Completes once the promise's continuation has run on the scheduler,
/// so whoever drives the scheduler must keep doing so while this is
/// awaited.
pub struct PromiseFuture<T, E> {
    watch: Rc<RefCell<Watch<T, E>>>,
}

struct Watch<T, E> {
    outcome: Option<Result<T, E>>,
    waker: Option<Waker>,
}

impl<T, E> Watch<T, E> {
    fn complete(watch: &RefCell<Self>, outcome: Result<T, E>) {
        let waker = {
            let mut watch = watch.borrow_mut();
            watch.outcome = Some(outcome);
            watch.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    type Output = Result<T, E>;
    type IntoFuture = PromiseFuture<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        let watch = Rc::new(RefCell::new(Watch {
            outcome: None,
            waker: None,
        }));
        let on_value = watch.clone();
        let on_reason = watch.clone();
        self.subscribe(
            move |value| Watch::complete(&on_value, Ok(value)),
            move |reason| Watch::complete(&on_reason, Err(reason)),
        );
        PromiseFuture { watch }
    }
}

impl<T, E> Future for PromiseFuture<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut watch = self.watch.borrow_mut();
        if let Some(outcome) = watch.outcome.take() {
            return Poll::Ready(outcome);
        }
        watch.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}
