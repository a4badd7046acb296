// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Middleware chain dispatcher.
//!
//! Stages run in order. Each stage receives the shared context and a
//! `Next` handle; advancing it dispatches the following stage and hands
//! back that stage's promise. Past the last stage the optional final
//! handler runs, otherwise the chain settles with `V::default()`.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use pledge::{panic_message, Promise, Runtime, Settle};
use tracing::{trace, warn};

use crate::error::ComposeError;

/// One stage of the chain.
pub type Middleware<C, V, E = ComposeError> = Rc<dyn Fn(C, Next<C, V, E>) -> Result<Settle<V, E>, E>>;

/// Composed chain of middleware. Dispatch any number of times; each
/// dispatch tracks its own progress.
pub struct Compose<C, V, E = ComposeError> {
    runtime: Runtime,
    stages: Rc<Vec<Middleware<C, V, E>>>,
}

impl<C, V, E> Clone for Compose<C, V, E> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            stages: self.stages.clone(),
        }
    }
}

/// Build a dispatcher over `stages`, in order.
pub fn compose<C, V, E, I>(runtime: &Runtime, stages: I) -> Compose<C, V, E>
where
    I: IntoIterator<Item = Middleware<C, V, E>>,
{
    Compose {
        runtime: runtime.clone(),
        stages: Rc::new(stages.into_iter().collect()),
    }
}

impl<C, V, E> Compose<C, V, E>
where
    C: Clone + 'static,
    V: Clone + Default + 'static,
    E: Clone + From<pledge::Error> + From<ComposeError> + 'static,
{
    pub fn new(runtime: &Runtime) -> Self {
        compose(runtime, Vec::new())
    }

    /// Append a stage.
    pub fn stage<F>(mut self, f: F) -> Self
    where
        F: Fn(C, Next<C, V, E>) -> Result<Settle<V, E>, E> + 'static,
    {
        Rc::make_mut(&mut self.stages).push(Rc::new(f));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the chain from the first stage with `ctx`.
    pub fn dispatch(&self, ctx: C, final_next: Option<Middleware<C, V, E>>) -> Promise<V, E> {
        let chain = Rc::new(Chain {
            runtime: self.runtime.clone(),
            stages: self.stages.clone(),
            final_next,
            last: Cell::new(None),
        });
        Chain::dispatch(&chain, 0, ctx)
    }
}

/// State of one dispatch.
struct Chain<C, V, E> {
    runtime: Runtime,
    stages: Rc<Vec<Middleware<C, V, E>>>,
    final_next: Option<Middleware<C, V, E>>,
    /// Highest stage index dispatched so far.
    last: Cell<Option<usize>>,
}

impl<C, V, E> Chain<C, V, E>
where
    C: Clone + 'static,
    V: Clone + Default + 'static,
    E: Clone + From<pledge::Error> + From<ComposeError> + 'static,
{
    fn dispatch(chain: &Rc<Self>, index: usize, ctx: C) -> Promise<V, E> {
        if chain.last.get().is_some_and(|last| index <= last) {
            warn!(stage = index, "next() called multiple times");
            return chain
                .runtime
                .reject(E::from(ComposeError::MultipleAdvance { stage: index }));
        }
        chain.last.set(Some(index));

        let stage = match index.cmp(&chain.stages.len()) {
            std::cmp::Ordering::Less => Some(chain.stages[index].clone()),
            std::cmp::Ordering::Equal => chain.final_next.clone(),
            std::cmp::Ordering::Greater => None,
        };
        let Some(stage) = stage else {
            trace!(stage = index, "end of chain");
            return chain.runtime.fulfilled(V::default());
        };

        trace!(stage = index, "dispatching");
        let next = Next {
            chain: chain.clone(),
            index: index + 1,
            ctx: ctx.clone(),
        };
        match panic::catch_unwind(AssertUnwindSafe(|| stage(ctx, next))) {
            Ok(Ok(candidate)) => chain.runtime.resolve(candidate),
            Ok(Err(reason)) => chain.runtime.reject(reason),
            Err(payload) => {
                let msg = panic_message(payload);
                warn!(stage = index, %msg, "middleware panicked");
                chain.runtime.reject(E::from(pledge::Error::Handler(msg)))
            }
        }
    }
}

/// Handle a stage uses to dispatch the stage after it.
pub struct Next<C, V, E = ComposeError> {
    chain: Rc<Chain<C, V, E>>,
    index: usize,
    ctx: C,
}

impl<C: Clone, V, E> Clone for Next<C, V, E> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            index: self.index,
            ctx: self.ctx.clone(),
        }
    }
}

impl<C, V, E> Next<C, V, E>
where
    C: Clone + 'static,
    V: Clone + Default + 'static,
    E: Clone + From<pledge::Error> + From<ComposeError> + 'static,
{
    /// Dispatch the following stage. A second call on the same stage
    /// yields a promise rejected with `ComposeError::MultipleAdvance`.
    pub fn advance(&self) -> Promise<V, E> {
        Chain::dispatch(&self.chain, self.index, self.ctx.clone())
    }

    /// Index of the stage `advance` will run.
    pub fn stage(&self) -> usize {
        self.index
    }
}
