//! Error types for the operation queue.

use thiserror::Error;

use super::{MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::operation::LifecycleError;

/// Errors returned by [`OperationQueue`](super::OperationQueue).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The queue no longer accepts operations (after `cancel_all`).
    #[error("operation queue is shut down")]
    ShutDown,

    /// The queue could not find an execution context to run on.
    #[error("queue setup failed: {0}")]
    Lifecycle(#[from] LifecycleError),
}
