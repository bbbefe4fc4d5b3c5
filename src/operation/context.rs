//! Execution contexts that operation drivers run on.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::LifecycleError;

/// Handle to the runtime an operation's callbacks are delivered on.
///
/// Each started operation gets a single driver task on its context, and every
/// strategy hook runs inside that task. Handing in the handle of a
/// current-thread runtime gives fully deterministic single-threaded execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    handle: Handle,
}

impl ExecutionContext {
    /// Captures the runtime the caller is currently running on.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NoExecutionContext`] outside a Tokio runtime.
    pub fn current() -> Result<Self, LifecycleError> {
        Handle::try_current()
            .map(Self::from_handle)
            .map_err(|_| LifecycleError::NoExecutionContext)
    }

    /// Wraps an explicit runtime handle.
    #[must_use]
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    /// Returns the underlying runtime handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl From<Handle> for ExecutionContext {
    fn from(handle: Handle) -> Self {
        Self::from_handle(handle)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_current_outside_runtime_is_rejected() {
        let result = ExecutionContext::current();
        assert!(matches!(result, Err(LifecycleError::NoExecutionContext)));
    }

    #[tokio::test]
    async fn test_current_inside_runtime_spawns() {
        let context = ExecutionContext::current().unwrap();
        let value = context.spawn(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }
}
