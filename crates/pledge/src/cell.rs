// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The promise cell: state machine, continuation queues, chaining.
//!
//! A cell starts `Pending` and moves to `Fulfilled` or `Rejected` at most
//! once. Continuations registered before that are queued; continuations
//! registered after are deferred immediately. Either way they run on a
//! later scheduler turn, in registration order.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{trace, warn};

use crate::error::{panic_message, Error};
use crate::resolve::{resolve_promise, resolving_functions, Reject, Resolve, Settle};
use crate::runtime::Runtime;

/// Lifecycle of a promise. `Fulfilled` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

enum Slot<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

/// A promise owned through a reaction, released iteratively on drop.
trait Orphan {
    /// Push the promises this one owns through its reactions, if nothing
    /// else holds it.
    fn release(self: Box<Self>, work: &mut Vec<Box<dyn Orphan>>);
}

/// One registered continuation: exactly one of the callbacks runs.
struct Reaction<T, E> {
    on_fulfilled: Box<dyn FnOnce(T)>,
    on_rejected: Box<dyn FnOnce(E)>,
    /// Promise the callbacks settle, if any.
    child: Option<Box<dyn Orphan>>,
}

pub(crate) struct Inner<T, E> {
    slot: Slot<T, E>,
    reactions: Vec<Reaction<T, E>>,
    /// Pending promise this one is adopting. Cleared on settlement.
    adopting: Option<Weak<RefCell<Inner<T, E>>>>,
}

// A pending chain owns its children through its reactions. Dropping it
// link by link would recurse once per link.
impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        if self.reactions.is_empty() {
            return;
        }
        let mut work = Vec::new();
        release_reactions(std::mem::take(&mut self.reactions), &mut work);
        while let Some(orphan) = work.pop() {
            orphan.release(&mut work);
        }
    }
}

fn release_reactions<T, E>(reactions: Vec<Reaction<T, E>>, work: &mut Vec<Box<dyn Orphan>>) {
    for reaction in reactions {
        let Reaction {
            on_fulfilled,
            on_rejected,
            child,
        } = reaction;
        drop(on_fulfilled);
        drop(on_rejected);
        work.extend(child);
    }
}

impl<T, E> Orphan for Promise<T, E> {
    fn release(self: Box<Self>, work: &mut Vec<Box<dyn Orphan>>) {
        if Rc::strong_count(&self.inner) == 1 {
            let reactions = std::mem::take(&mut self.inner.borrow_mut().reactions);
            release_reactions(reactions, work);
        }
    }
}

/// Handle to a deferred value. Clones share the same cell.
pub struct Promise<T, E = Error> {
    inner: Rc<RefCell<Inner<T, E>>>,
    runtime: Runtime,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T, E> Promise<T, E> {
    /// Whether both handles point at the same cell.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn state(&self) -> State {
        match self.inner.borrow().slot {
            Slot::Pending => State::Pending,
            Slot::Fulfilled(_) => State::Fulfilled,
            Slot::Rejected(_) => State::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    fn id(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + 'static,
    E: Clone + From<Error> + 'static,
{
    pub(crate) fn pending(runtime: &Runtime) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                slot: Slot::Pending,
                reactions: Vec::new(),
                adopting: None,
            })),
            runtime: runtime.clone(),
        }
    }

    /// Create a promise and run `executor` on it synchronously.
    ///
    /// The executor gets the promise's settle handles. Returning `Err`
    /// rejects the promise unless a handle already settled it; a panic
    /// rejects it with `Error::Executor`.
    pub fn new<F>(runtime: &Runtime, executor: F) -> Self
    where
        F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        let promise = Self::pending(runtime);
        let (resolve, reject) = resolving_functions(&promise);
        let handle = reject.clone();
        match panic::catch_unwind(AssertUnwindSafe(move || executor(resolve, handle))) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => reject.reject(reason),
            Err(payload) => {
                let msg = panic_message(payload);
                warn!(promise = promise.id(), %msg, "executor panicked");
                reject.reject(E::from(Error::Executor(msg)));
            }
        }
        promise
    }

    /// Clone of the settled value or reason, `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        match &self.inner.borrow().slot {
            Slot::Pending => None,
            Slot::Fulfilled(value) => Some(Ok(value.clone())),
            Slot::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Move the slot out of `Pending` and hand back the reactions, or
    /// `None` if already settled.
    fn settle(&self, slot: Slot<T, E>) -> Option<Vec<Reaction<T, E>>> {
        let mut inner = self.inner.borrow_mut();
        if !matches!(inner.slot, Slot::Pending) {
            return None;
        }
        inner.slot = slot;
        inner.adopting = None;
        Some(std::mem::take(&mut inner.reactions))
    }

    /// Settle as fulfilled and defer the fulfillment callbacks. No-op
    /// unless pending.
    pub(crate) fn fulfill(&self, value: T) {
        let Some(reactions) = self.settle(Slot::Fulfilled(value.clone())) else {
            return;
        };
        trace!(promise = self.id(), continuations = reactions.len(), "fulfilled");
        // The losing callbacks are dropped here, outside the borrow.
        for reaction in reactions {
            let value = value.clone();
            let callback = reaction.on_fulfilled;
            self.runtime.defer(Box::new(move || callback(value)));
        }
    }

    /// Settle as rejected and defer the rejection callbacks. No-op unless
    /// pending.
    pub(crate) fn reject(&self, reason: E) {
        let Some(reactions) = self.settle(Slot::Rejected(reason.clone())) else {
            return;
        };
        trace!(promise = self.id(), continuations = reactions.len(), "rejected");
        for reaction in reactions {
            let reason = reason.clone();
            let callback = reaction.on_rejected;
            self.runtime.defer(Box::new(move || callback(reason)));
        }
    }

    /// Register raw callbacks. Exactly one of them runs, on a later turn.
    pub(crate) fn subscribe<F, R>(&self, on_fulfilled: F, on_rejected: R)
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(E) + 'static,
    {
        self.enqueue(on_fulfilled, on_rejected, None);
    }

    /// `subscribe` for callbacks that settle `child`. While pending, this
    /// promise owns `child`.
    pub(crate) fn subscribe_for<U, F, R>(&self, child: &Promise<U, E>, on_fulfilled: F, on_rejected: R)
    where
        U: Clone + 'static,
        F: FnOnce(T) + 'static,
        R: FnOnce(E) + 'static,
    {
        let child: Box<dyn Orphan> = Box::new(child.clone());
        self.enqueue(on_fulfilled, on_rejected, Some(child));
    }

    fn enqueue<F, R>(&self, on_fulfilled: F, on_rejected: R, child: Option<Box<dyn Orphan>>)
    where
        F: FnOnce(T) + 'static,
        R: FnOnce(E) + 'static,
    {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            let settled = match &inner.slot {
                Slot::Pending => None,
                Slot::Fulfilled(value) => Some(Ok(value.clone())),
                Slot::Rejected(reason) => Some(Err(reason.clone())),
            };
            if settled.is_none() {
                inner.reactions.push(Reaction {
                    on_fulfilled: Box::new(on_fulfilled),
                    on_rejected: Box::new(on_rejected),
                    child,
                });
                return;
            }
            settled
        };
        match settled {
            Some(Ok(value)) => self.runtime.defer(Box::new(move || on_fulfilled(value))),
            Some(Err(reason)) => self.runtime.defer(Box::new(move || on_rejected(reason))),
            None => {}
        }
    }

    /// Record that this promise now follows `source`.
    pub(crate) fn set_adopting(&self, source: &Promise<T, E>) {
        trace!(promise = self.id(), source = source.id(), "adopting");
        self.inner.borrow_mut().adopting = Some(Rc::downgrade(&source.inner));
    }

    /// Whether `target` is this promise or sits on its adoption chain.
    pub(crate) fn adopts(&self, target: &Promise<T, E>) -> bool {
        let mut current = Some(self.inner.clone());
        while let Some(cell) = current {
            if Rc::ptr_eq(&cell, &target.inner) {
                return true;
            }
            current = cell.borrow().adopting.as_ref().and_then(Weak::upgrade);
        }
        false
    }

    /// Chain a continuation. Returns a new promise settled by whichever
    /// handler runs: its `Ok` goes through the resolution procedure, its
    /// `Err` rejects, and a panic rejects with `Error::Handler`.
    pub fn then<U, F, R>(&self, on_fulfilled: F, on_rejected: R) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Settle<U, E>, E> + 'static,
        R: FnOnce(E) -> Result<Settle<U, E>, E> + 'static,
    {
        let child = Promise::<U, E>::pending(&self.runtime);
        let on_value = {
            let child = child.clone();
            move |value: T| run_handler(&child, move || on_fulfilled(value))
        };
        let on_reason = {
            let child = child.clone();
            move |reason: E| run_handler(&child, move || on_rejected(reason))
        };
        self.subscribe_for(&child, on_value, on_reason);
        child
    }

    /// `then` with rejections passed through untouched.
    pub fn and_then<U, F>(&self, on_fulfilled: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<Settle<U, E>, E> + 'static,
    {
        self.then(on_fulfilled, |reason: E| Err(reason))
    }

    /// `and_then` for a plain, infallible transform.
    pub fn map<U, F>(&self, f: F) -> Promise<U, E>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.and_then(move |value| Ok(Settle::Value(f(value))))
    }

    /// `then` with fulfillments passed through untouched.
    pub fn catch<R>(&self, on_rejected: R) -> Promise<T, E>
    where
        R: FnOnce(E) -> Result<Settle<T, E>, E> + 'static,
    {
        self.then(|value: T| Ok(Settle::Value(value)), on_rejected)
    }
}

fn run_handler<U, E, H>(child: &Promise<U, E>, handler: H)
where
    U: Clone + 'static,
    E: Clone + From<Error> + 'static,
    H: FnOnce() -> Result<Settle<U, E>, E>,
{
    match panic::catch_unwind(AssertUnwindSafe(handler)) {
        Ok(Ok(candidate)) => resolve_promise(child, candidate),
        Ok(Err(reason)) => child.reject(reason),
        Err(payload) => {
            let msg = panic_message(payload);
            warn!(promise = child.id(), %msg, "continuation handler panicked");
            child.reject(E::from(Error::Handler(msg)));
        }
    }
}

impl<T, E> std::fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
