// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime handle: the scheduler every promise defers to, plus the
//! static constructors (`resolve`, `reject`, `deferred`, `all`, `race`).

use std::rc::Rc;

use crate::cell::Promise;
use crate::combinators;
use crate::config::Config;
use crate::error::Error;
use crate::resolve::{resolve_promise, resolving_functions, Reject, Resolve, Settle};
use crate::scheduler::{EventLoop, Scheduler, Task};

/// Cheap, cloneable handle to a scheduler. Every promise carries one.
#[derive(Clone)]
pub struct Runtime {
    scheduler: Rc<dyn Scheduler>,
    unwrap_limit: Option<usize>,
}

impl Runtime {
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self::with_config(scheduler, &Config::default())
    }

    pub fn with_config(scheduler: Rc<dyn Scheduler>, config: &Config) -> Self {
        Self {
            scheduler,
            unwrap_limit: config.unwrap_limit,
        }
    }

    /// Runtime bound to a fresh `EventLoop`. The loop is returned so the
    /// caller can drive it.
    pub fn event_loop(config: &Config) -> (Self, Rc<EventLoop>) {
        let ev = Rc::new(EventLoop::with_config(config));
        (Self::with_config(ev.clone(), config), ev)
    }

    pub(crate) fn defer(&self, task: Task) {
        self.scheduler.defer(task);
    }

    pub(crate) fn unwrap_limit(&self) -> Option<usize> {
        self.unwrap_limit
    }

    /// Construct a promise driven by `executor`. See `Promise::new`.
    pub fn promise<T, E, F>(&self, executor: F) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
        F: FnOnce(Resolve<T, E>, Reject<T, E>) -> Result<(), E>,
    {
        Promise::new(self, executor)
    }

    /// Promise settled by running the resolution procedure on `candidate`.
    ///
    /// A promise candidate is returned as is.
    pub fn resolve<T, E>(&self, candidate: Settle<T, E>) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
    {
        if let Settle::Promise(promise) = candidate {
            return promise;
        }
        let promise = Promise::pending(self);
        resolve_promise(&promise, candidate);
        promise
    }

    /// Shorthand for `resolve(Settle::Value(value))`.
    pub fn fulfilled<T, E>(&self, value: T) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
    {
        self.resolve(Settle::Value(value))
    }

    /// Promise rejected with `reason`, taken verbatim.
    pub fn reject<T, E>(&self, reason: E) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
    {
        let promise = Promise::pending(self);
        promise.reject(reason);
        promise
    }

    /// Pending promise plus its settle handles, for settling from outside
    /// an executor.
    pub fn deferred<T, E>(&self) -> Deferred<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
    {
        let promise = Promise::pending(self);
        let (resolve, reject) = resolving_functions(&promise);
        Deferred {
            promise,
            resolve,
            reject,
        }
    }

    /// See [`combinators::all`].
    pub fn all<T, E, I>(&self, promises: I) -> Promise<Vec<T>, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
        I: IntoIterator<Item = Promise<T, E>>,
    {
        combinators::all(self, promises)
    }

    /// See [`combinators::race`].
    pub fn race<T, E, I>(&self, promises: I) -> Promise<T, E>
    where
        T: Clone + 'static,
        E: Clone + From<Error> + 'static,
        I: IntoIterator<Item = Promise<T, E>>,
    {
        combinators::race(self, promises)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("unwrap_limit", &self.unwrap_limit)
            .finish_non_exhaustive()
    }
}

/// A pending promise with its settle handles exposed.
pub struct Deferred<T, E = Error> {
    pub promise: Promise<T, E>,
    pub resolve: Resolve<T, E>,
    pub reject: Reject<T, E>,
}
