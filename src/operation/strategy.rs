//! The strategy seam that specialises a generic [`Operation`](super::Operation).

use async_trait::async_trait;

use crate::error::OperationError;

/// Behaviour plugged into an [`Operation`](super::Operation).
///
/// All hooks run on the operation's execution context, inside its single
/// driver task, so a strategy never sees concurrent access to its fields.
///
/// The value returned by [`on_start`](Self::on_start) is the operation's
/// outcome. If the operation is cancelled while `on_start` is in flight, the
/// `on_start` future is dropped and [`on_cancel_requested`](Self::on_cancel_requested)
/// provides the outcome instead. [`on_before_finish`](Self::on_before_finish)
/// always runs last, whichever path produced the outcome.
#[async_trait]
pub trait OperationStrategy: Send + 'static {
    /// Shared view of the strategy that callers can read while it executes.
    type Observer: Clone + Send + Sync + 'static;

    /// Returns the observer handed out by the owning operation.
    ///
    /// Called once, when the operation is constructed.
    fn observer(&self) -> Self::Observer;

    /// Performs the work of the operation.
    async fn on_start(&mut self) -> Result<(), OperationError>;

    /// Reacts to cancellation while executing and returns the terminal error.
    fn on_cancel_requested(&mut self) -> OperationError {
        OperationError::Cancelled
    }

    /// Runs right before the outcome is published.
    ///
    /// `error` is the outcome about to be stored, `cancelled` the operation's
    /// cancellation flag at this point.
    async fn on_before_finish(&mut self, _error: Option<&OperationError>, _cancelled: bool) {}
}
