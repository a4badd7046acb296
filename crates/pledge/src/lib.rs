// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Deferred values for a single-threaded cooperative event loop.
//!
//! A `Promise` holds the eventual outcome of some work: a value or a
//! reason. Continuations chained with `then` run on a later scheduler
//! turn, never inline, and each chain step yields a new promise.
//!
//! Components:
//! - `cell`: Promise state machine, continuation queues, chaining
//! - `resolve`: Resolution procedure, thenable adaptation, settle handles
//! - `scheduler`: Scheduler trait + deterministic `EventLoop`
//! - `combinators`: `all` / `race`
//! - `runtime`: Runtime handle and static constructors
//! - `future`: `IntoFuture` bridge

mod cell;
pub mod combinators;
mod config;
mod error;
mod future;
mod resolve;
mod runtime;
pub mod scheduler;

pub use cell::{Promise, State};
pub use combinators::{all, race};
pub use config::Config;
pub use error::{panic_message, Error};
pub use future::PromiseFuture;
pub use resolve::{Reject, Resolve, Settle, Thenable};
pub use runtime::{Deferred, Runtime};
pub use scheduler::{EventLoop, Scheduler, Task};
