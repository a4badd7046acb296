// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Middleware composition on top of `pledge` promises.
//!
//! A `Compose` holds an ordered list of stages. `dispatch` runs the first
//! stage; each stage decides whether and when to run the rest by calling
//! `Next::advance`, which returns the promise of the downstream chain.

mod compose;
mod error;

pub use compose::{compose, Compose, Middleware, Next};
pub use error::ComposeError;
