// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Composer errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    /// A stage's `next` was advanced more than once.
    #[error("next() called multiple times (stage {stage})")]
    MultipleAdvance { stage: usize },

    /// A failure raised by the promise layer.
    #[error(transparent)]
    Pledge(#[from] pledge::Error),
}

impl From<ComposeError> for pledge::Error {
    fn from(err: ComposeError) -> Self {
        match err {
            ComposeError::Pledge(inner) => inner,
            other => pledge::Error::Rejected(other.to_string()),
        }
    }
}
