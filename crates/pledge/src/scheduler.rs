// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Continuation scheduling.
//!
//! Continuations never run inside the call that registered them or the
//! call that settled their promise. They are handed to a `Scheduler`,
//! which runs them on a later turn. `EventLoop` is the stock
//! single-threaded FIFO implementation; hosts with their own task queue
//! implement `Scheduler` instead.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use tracing::trace;

use crate::config::Config;
use crate::error::Error;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Task queue the promises defer their continuations to.
pub trait Scheduler {
    /// Queue `task` for a later turn. Must not run it before returning.
    ///
    /// Tasks deferred in order must run in that order.
    fn defer(&self, task: Task);
}

/// Single-threaded FIFO task queue, drained by hand.
///
/// Nothing runs until the owner calls `turn` or `run_until_idle`, which
/// keeps tests deterministic.
pub struct EventLoop {
    queue: RefCell<VecDeque<Task>>,
    turn_limit: Option<usize>,
    /// Tasks run over the loop's lifetime.
    turns: Cell<u64>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    pub fn with_config(config: &Config) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            turn_limit: config.turn_limit,
            turns: Cell::new(0),
        }
    }

    /// Run the oldest queued task. Returns false if the queue was empty.
    pub fn turn(&self) -> bool {
        // Release the queue before running: tasks defer more tasks.
        let task = self.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                self.turns.set(self.turns.get() + 1);
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks queued along
    /// the way. Returns how many ran.
    pub fn run_until_idle(&self) -> Result<usize, Error> {
        let mut ran = 0;
        loop {
            if let Some(limit) = self.turn_limit {
                if ran >= limit && !self.is_idle() {
                    trace!(limit, pending = self.pending(), "turn limit reached");
                    return Err(Error::TurnLimit(limit));
                }
            }
            if !self.turn() {
                return Ok(ran);
            }
            ran += 1;
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    pub fn total_turns(&self) -> u64 {
        self.turns.get()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for EventLoop {
    fn defer(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .field("turn_limit", &self.turn_limit)
            .field("turns", &self.turns.get())
            .finish()
    }
}
