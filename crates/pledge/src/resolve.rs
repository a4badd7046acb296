// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Resolution procedure.
//!
//! Turns a settlement candidate into an outcome for a target promise:
//! plain values fulfill, promises are adopted, thenables are adapted
//! through their `then`. The procedure runs as a loop so a thenable that
//! resolves synchronously with another thenable does not grow the stack.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::cell::Promise;
use crate::error::{panic_message, Error};

/// A candidate for settling a promise.
pub enum Settle<T, E = Error> {
    /// Fulfill with this value.
    Value(T),
    /// Adopt this promise's eventual outcome.
    Promise(Promise<T, E>),
    /// Adapt a foreign deferred value through its `then`.
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Settle<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E> + 'static) -> Self {
        Self::Thenable(Box::new(thenable))
    }
}

impl<T, E> From<Promise<T, E>> for Settle<T, E> {
    fn from(promise: Promise<T, E>) -> Self {
        Self::Promise(promise)
    }
}

impl<T, E> std::fmt::Debug for Settle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Settle::Value(_) => f.write_str("Settle::Value(..)"),
            Settle::Promise(p) => f.debug_tuple("Settle::Promise").field(p).finish(),
            Settle::Thenable(_) => f.write_str("Settle::Thenable(..)"),
        }
    }
}

/// A foreign deferred value exposing a `then(resolve, reject)` capability.
///
/// The implementation may call `resolve`/`reject` at once, later, or more
/// than once. Only the first call counts. Returning `Err` rejects the
/// target unless one of the handles was already called.
pub trait Thenable<T, E = Error> {
    fn then(&self, resolve: Resolve<T, E>, reject: Reject<T, E>) -> Result<(), E>;
}

impl<T, E, F> Thenable<T, E> for F
where
    F: Fn(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
{
    fn then(&self, resolve: Resolve<T, E>, reject: Reject<T, E>) -> Result<(), E> {
        self(resolve, reject)
    }
}

/// State shared by one `Resolve`/`Reject` pair.
struct Binding<T, E> {
    target: Promise<T, E>,
    resolved: Cell<bool>,
    /// Reject is locked out by an earlier resolve too. Only the pair
    /// handed to a thenable's `then` is exclusive.
    exclusive: bool,
    /// True while the adapting `then` call is still on the stack.
    inline: Cell<bool>,
    /// Candidate handed over inline, picked up by the resolution loop.
    parked: RefCell<Option<Settle<T, E>>>,
}

impl<T, E> Binding<T, E> {
    fn new(target: Promise<T, E>, adapting: bool) -> Rc<Self> {
        Rc::new(Self {
            target,
            resolved: Cell::new(false),
            exclusive: adapting,
            inline: Cell::new(adapting),
            parked: RefCell::new(None),
        })
    }

    /// Claim the one-shot. False if the pair was already used.
    fn claim(&self) -> bool {
        !self.resolved.replace(true)
    }
}

/// Resolve handle. Runs the resolution procedure on the first call of
/// either handle in its pair; later calls do nothing.
pub struct Resolve<T, E = Error> {
    binding: Rc<Binding<T, E>>,
}

/// Reject handle. Rejects the target if it is still pending, even when
/// it is adopting another promise. Handles given to a thenable are the
/// exception: there, only the first call of either handle counts.
pub struct Reject<T, E = Error> {
    binding: Rc<Binding<T, E>>,
}

impl<T, E> Clone for Resolve<T, E> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding.clone(),
        }
    }
}

impl<T, E> Clone for Reject<T, E> {
    fn clone(&self) -> Self {
        Self {
            binding: self.binding.clone(),
        }
    }
}

impl<T, E> Resolve<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub fn resolve(&self, candidate: Settle<T, E>) {
        let binding = &self.binding;
        if !binding.claim() {
            debug!("ignoring repeated resolve");
            return;
        }
        if binding.inline.get() {
            *binding.parked.borrow_mut() = Some(candidate);
        } else {
            resolve_promise(&binding.target, candidate);
        }
    }

    pub fn fulfill(&self, value: T) {
        self.resolve(Settle::Value(value));
    }

    /// Whether this pair has already been used.
    pub fn is_resolved(&self) -> bool {
        self.binding.resolved.get()
    }
}

impl<T, E> Reject<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub fn reject(&self, reason: E) {
        let binding = &self.binding;
        if !binding.claim() && (binding.exclusive || !binding.target.is_pending()) {
            debug!("ignoring repeated reject");
            return;
        }
        binding.target.reject(reason);
    }

    pub fn is_resolved(&self) -> bool {
        self.binding.resolved.get()
    }
}

/// Settle handles for `target` that act immediately when called.
pub(crate) fn resolving_functions<T, E>(target: &Promise<T, E>) -> (Resolve<T, E>, Reject<T, E>) {
    let binding = Binding::new(target.clone(), false);
    (
        Resolve {
            binding: binding.clone(),
        },
        Reject { binding },
    )
}

/// Settle `target` from `candidate`.
pub(crate) fn resolve_promise<T, E>(target: &Promise<T, E>, candidate: Settle<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let limit = target.runtime().unwrap_limit();
    let mut next = Some(candidate);
    let mut steps = 0usize;
    while let Some(candidate) = next.take() {
        steps += 1;
        if let Some(limit) = limit {
            if steps > limit {
                warn!(limit, "resolution unwrap limit reached");
                target.reject(E::from(Error::UnwrapLimit(limit)));
                return;
            }
        }
        next = match candidate {
            Settle::Value(value) => {
                target.fulfill(value);
                None
            }
            Settle::Promise(source) => {
                adopt(target, source);
                None
            }
            Settle::Thenable(thenable) => adapt(target, thenable.as_ref()),
        };
    }
}

fn adopt<T, E>(target: &Promise<T, E>, source: Promise<T, E>)
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    if source.adopts(target) {
        warn!("promise resolved with itself");
        target.reject(E::from(Error::CyclicResolution));
        return;
    }
    match source.outcome() {
        Some(Ok(value)) => target.fulfill(value),
        Some(Err(reason)) => target.reject(reason),
        None => {
            target.set_adopting(&source);
            let on_value = target.clone();
            let on_reason = target.clone();
            source.subscribe_for(
                target,
                move |value| resolve_promise(&on_value, Settle::Value(value)),
                move |reason| on_reason.reject(reason),
            );
        }
    }
}

/// Invoke `thenable.then` under a one-shot guard. Returns the candidate
/// it resolved with inline, for the caller's loop to continue with.
fn adapt<T, E>(target: &Promise<T, E>, thenable: &dyn Thenable<T, E>) -> Option<Settle<T, E>>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    let binding = Binding::new(target.clone(), true);
    let resolve = Resolve {
        binding: binding.clone(),
    };
    let reject = Reject {
        binding: binding.clone(),
    };
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| thenable.then(resolve, reject)));
    binding.inline.set(false);

    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(reason)) => Some(reason),
        Err(payload) => {
            let msg = panic_message(payload);
            warn!(%msg, "thenable panicked");
            Some(E::from(Error::Adaptation(msg)))
        }
    };
    if let Some(reason) = failure {
        if binding.claim() {
            target.reject(reason);
        } else {
            debug!("ignoring thenable failure after it already resolved");
        }
    }

    let parked = binding.parked.borrow_mut().take();
    if parked.is_some() {
        trace!("continuing with inline thenable resolution");
    }
    parked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::State;
    use crate::config::Config;
    use crate::runtime::Runtime;
    use crate::scheduler::EventLoop;

    fn runtime() -> (Runtime, Rc<EventLoop>) {
        Runtime::event_loop(&Config::default())
    }

    /// Thenable that resolves inline with `depth` more layers of itself.
    struct Nested(usize);

    impl Thenable<i32> for Nested {
        fn then(&self, resolve: Resolve<i32>, _: Reject<i32>) -> Result<(), Error> {
            if self.0 == 0 {
                resolve.fulfill(42);
            } else {
                resolve.resolve(Settle::thenable(Nested(self.0 - 1)));
            }
            Ok(())
        }
    }

    #[test]
    fn thenable_resolving_inline_fulfills() {
        let (rt, _ev) = runtime();
        let p = rt.resolve(Settle::thenable(|resolve: Resolve<i32>, _: Reject<i32>| {
            resolve.fulfill(42);
            Ok(())
        }));
        assert_eq!(p.outcome(), Some(Ok(42)));
    }

    #[test]
    fn thenable_first_call_wins() {
        let (rt, _ev) = runtime();
        let p = rt.resolve(Settle::thenable(|resolve: Resolve<i32>, reject: Reject<i32>| {
            resolve.fulfill(1);
            reject.reject(Error::rejected("ignored"));
            resolve.fulfill(2);
            Ok(())
        }));
        assert_eq!(p.outcome(), Some(Ok(1)));
    }

    #[test]
    fn thenable_reject_first_wins() {
        let (rt, _ev) = runtime();
        let p = rt.resolve(Settle::thenable(|resolve: Resolve<i32>, reject: Reject<i32>| {
            reject.reject(Error::rejected("first"));
            resolve.fulfill(2);
            Ok(())
        }));
        assert_eq!(p.outcome(), Some(Err(Error::rejected("first"))));
    }

    #[test]
    fn thenable_error_rejects() {
        let (rt, _ev) = runtime();
        let p = rt.resolve(Settle::thenable(|_: Resolve<i32>, _: Reject<i32>| {
            Err(Error::rejected("then raised"))
        }));
        assert_eq!(p.outcome(), Some(Err(Error::rejected("then raised"))));
    }

    #[test]
    fn thenable_error_after_resolve_is_ignored() {
        let (rt, _ev) = runtime();
        let p = rt.resolve(Settle::thenable(|resolve: Resolve<i32>, _: Reject<i32>| {
            resolve.fulfill(5);
            Err(Error::rejected("too late"))
        }));
        assert_eq!(p.outcome(), Some(Ok(5)));
    }

    #[test]
    fn thenable_panic_becomes_adaptation_error() {
        let (rt, _ev) = runtime();
        let p = rt.resolve(Settle::thenable(|_: Resolve<i32>, _: Reject<i32>| -> Result<(), Error> {
            panic!("then exploded")
        }));
        assert_eq!(
            p.outcome(),
            Some(Err(Error::Adaptation("then exploded".into())))
        );
    }

    #[test]
    fn thenable_resolving_later_settles_on_call() {
        let (rt, _ev) = runtime();
        let stash: Rc<RefCell<Option<Resolve<i32>>>> = Rc::new(RefCell::new(None));
        let s = stash.clone();
        let p = rt.resolve(Settle::thenable(move |resolve: Resolve<i32>, _: Reject<i32>| {
            *s.borrow_mut() = Some(resolve);
            Ok(())
        }));
        assert_eq!(p.state(), State::Pending);

        let resolve = stash.borrow_mut().take().unwrap();
        resolve.fulfill(8);
        assert_eq!(p.outcome(), Some(Ok(8)));
        resolve.fulfill(9);
        assert_eq!(p.outcome(), Some(Ok(8)));
    }

    #[test]
    fn thenable_resolving_with_target_is_cycle() {
        let (rt, _ev) = runtime();
        let d = rt.deferred::<i32, Error>();
        let target = d.promise.clone();
        d.resolve.resolve(Settle::thenable(move |resolve: Resolve<i32>, _: Reject<i32>| {
            resolve.resolve(Settle::Promise(target.clone()));
            Ok(())
        }));
        assert_eq!(d.promise.outcome(), Some(Err(Error::CyclicResolution)));
    }

    #[test]
    fn deep_inline_thenable_chain_uses_constant_stack() {
        let (rt, _ev) = runtime();
        let p = rt.resolve(Settle::thenable(Nested(200_000)));
        assert_eq!(p.outcome(), Some(Ok(42)));
    }

    #[test]
    fn unwrap_limit_rejects_long_chain() {
        let (rt, _ev) = Runtime::event_loop(&Config::new().with_unwrap_limit(10));
        let p = rt.resolve(Settle::thenable(Nested(100)));
        assert_eq!(p.outcome(), Some(Err(Error::UnwrapLimit(10))));

        let q = rt.resolve(Settle::thenable(Nested(5)));
        assert_eq!(q.outcome(), Some(Ok(42)));
    }

    #[test]
    fn self_resolution_rejects() {
        let (rt, _ev) = runtime();
        let d = rt.deferred::<i32, Error>();
        d.resolve.resolve(Settle::Promise(d.promise.clone()));
        assert_eq!(d.promise.outcome(), Some(Err(Error::CyclicResolution)));
    }

    #[test]
    fn mutual_adoption_rejects_instead_of_hanging() {
        let (rt, ev) = runtime();
        let a = rt.deferred::<i32, Error>();
        let b = rt.deferred::<i32, Error>();
        a.resolve.resolve(Settle::Promise(b.promise.clone()));
        b.resolve.resolve(Settle::Promise(a.promise.clone()));
        ev.run_until_idle().unwrap();
        assert_eq!(b.promise.outcome(), Some(Err(Error::CyclicResolution)));
        assert_eq!(a.promise.outcome(), Some(Err(Error::CyclicResolution)));
    }

    #[test]
    fn adopting_settled_promise_is_immediate() {
        let (rt, _ev) = runtime();
        let done: Promise<i32> = rt.fulfilled(3);
        let d = rt.deferred::<i32, Error>();
        d.resolve.resolve(done.into());
        assert_eq!(d.promise.outcome(), Some(Ok(3)));
    }

    #[test]
    fn reject_while_adopting_pending_promise_settles() {
        let (rt, ev) = runtime();
        let source = rt.deferred::<i32, Error>();
        let d = rt.deferred::<i32, Error>();
        d.resolve.resolve(Settle::Promise(source.promise.clone()));
        assert_eq!(d.promise.state(), State::Pending);
        d.reject.reject(Error::rejected("r"));
        assert_eq!(d.promise.state(), State::Rejected);

        source.resolve.fulfill(11);
        ev.run_until_idle().unwrap();
        assert_eq!(d.promise.outcome(), Some(Err(Error::rejected("r"))));
    }

    #[test]
    fn second_resolve_while_adopting_is_ignored() {
        let (rt, ev) = runtime();
        let source = rt.deferred::<i32, Error>();
        let d = rt.deferred::<i32, Error>();
        d.resolve.resolve(Settle::Promise(source.promise.clone()));
        d.resolve.fulfill(2);
        assert_eq!(d.promise.state(), State::Pending);

        source.resolve.fulfill(11);
        ev.run_until_idle().unwrap();
        assert_eq!(d.promise.outcome(), Some(Ok(11)));
    }

    #[test]
    fn reject_after_settlement_is_ignored() {
        let (rt, _ev) = runtime();
        let d = rt.deferred::<i32, Error>();
        d.resolve.fulfill(1);
        d.reject.reject(Error::rejected("late"));
        assert!(d.reject.is_resolved());
        assert_eq!(d.promise.outcome(), Some(Ok(1)));
    }

    #[test]
    fn thenable_reject_after_pending_resolve_is_ignored() {
        let (rt, ev) = runtime();
        let source = rt.deferred::<i32, Error>();
        let inner = source.promise.clone();
        let p = rt.resolve(Settle::thenable(move |resolve: Resolve<i32>, reject: Reject<i32>| {
            resolve.resolve(Settle::Promise(inner.clone()));
            reject.reject(Error::rejected("ignored"));
            Ok(())
        }));
        assert_eq!(p.state(), State::Pending);
        source.resolve.fulfill(3);
        ev.run_until_idle().unwrap();
        assert_eq!(p.outcome(), Some(Ok(3)));
    }
}
