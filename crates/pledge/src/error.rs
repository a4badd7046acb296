// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Failure kinds the library injects into the rejection channel.

use std::any::Any;

use thiserror::Error;

/// A rejection reason raised by the library itself, or a plain caller
/// reason when `Error` is used as the promise's reason type.
///
/// Custom reason types opt in with `impl From<Error> for MyReason`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A promise was resolved with itself, directly or through the chain
    /// of promises it adopts.
    #[error("promise cannot be resolved with itself")]
    CyclicResolution,

    /// A thenable panicked while its `then` was being invoked.
    #[error("thenable failed during adaptation: {0}")]
    Adaptation(String),

    /// A fulfillment or rejection handler panicked.
    #[error("continuation handler panicked: {0}")]
    Handler(String),

    /// The executor passed to `Promise::new` panicked.
    #[error("executor panicked: {0}")]
    Executor(String),

    /// Resolution unwrapped more candidates than the configured limit.
    #[error("resolution gave up after unwrapping {0} candidates")]
    UnwrapLimit(usize),

    /// `EventLoop::run_until_idle` hit its turn budget with work queued.
    #[error("event loop stopped after {0} turns with work still queued")]
    TurnLimit(usize),

    /// Caller-supplied reason.
    #[error("{0}")]
    Rejected(String),
}

impl Error {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

impl From<&str> for Error {
    fn from(reason: &str) -> Self {
        Self::Rejected(reason.to_string())
    }
}

impl From<String> for Error {
    fn from(reason: String) -> Self {
        Self::Rejected(reason)
    }
}

/// Render a payload caught by `catch_unwind` as text.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
