//! Bounded FIFO queue of operations.
//!
//! [`OperationQueue`] starts submitted operations in submission order and
//! keeps at most `max_concurrent` of them executing. Ownership passes to the
//! queue on [`add`](OperationQueue::add); callers keep their own handle (every
//! [`Operation`](crate::operation::Operation) is a cheap clone) to read results.
//!
//! # Example
//!
//! ```no_run
//! use video_downloader::download::DownloadOperation;
//! use video_downloader::fetch::{HttpClient, HttpFetch};
//! use video_downloader::queue::OperationQueue;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = OperationQueue::new(2)?;
//! let client = HttpClient::new();
//! let mut downloads: Vec<DownloadOperation> = Vec::new();
//! for n in 0..5 {
//!     let url = url::Url::parse(&format!("https://example.com/clip{n}.mp4"))?;
//!     let operation = HttpFetch::download(client.clone(), url, "./downloads", 0).into_operation();
//!     queue.add(operation.clone())?;
//!     downloads.push(operation);
//! }
//! queue.wait_until_drained().await;
//! # Ok(())
//! # }
//! ```

mod error;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Semaphore, mpsc, watch};
use tracing::{debug, info, instrument, warn};

pub use error::QueueError;

use crate::operation::{ExecutionContext, OperationId, OperationState, QueuedOperation};

/// Minimum allowed concurrency value.
pub(crate) const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub(crate) const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 4;

type Held = Arc<dyn QueuedOperation>;

struct Shared {
    context: ExecutionContext,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
    held: Mutex<BTreeMap<OperationId, Held>>,
    outstanding: watch::Sender<usize>,
    running: AtomicUsize,
}

impl Shared {
    fn held(&self) -> std::sync::MutexGuard<'_, BTreeMap<OperationId, Held>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, id: OperationId) {
        self.held().remove(&id);
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Queue executing operations with bounded concurrency.
///
/// Dropping the queue does not cancel anything: operations already submitted
/// still run to completion.
pub struct OperationQueue {
    shared: Arc<Shared>,
    submissions: mpsc::UnboundedSender<Held>,
    max_concurrent: usize,
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("max_concurrent", &self.max_concurrent)
            .field("operation_count", &self.operation_count())
            .field("running_count", &self.running_count())
            .finish_non_exhaustive()
    }
}

impl OperationQueue {
    /// Creates a queue on the current Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConcurrency`] unless
    /// `1 <= max_concurrent <= 100`, and [`QueueError::Lifecycle`] outside a
    /// Tokio runtime.
    pub fn new(max_concurrent: usize) -> Result<Self, QueueError> {
        Self::validate(max_concurrent)?;
        Self::with_context(max_concurrent, ExecutionContext::current()?)
    }

    /// Creates a queue whose dispatcher (and context-less operations) run on `context`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidConcurrency`] unless `1 <= max_concurrent <= 100`.
    #[instrument(level = "debug", skip(context))]
    pub fn with_context(
        max_concurrent: usize,
        context: ExecutionContext,
    ) -> Result<Self, QueueError> {
        Self::validate(max_concurrent)?;
        debug!(max_concurrent, "creating operation queue");

        let (submissions, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            context: context.clone(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            closed: AtomicBool::new(false),
            held: Mutex::new(BTreeMap::new()),
            outstanding: watch::channel(0).0,
            running: AtomicUsize::new(0),
        });
        context.spawn(dispatch(Arc::clone(&shared), receiver));

        Ok(Self {
            shared,
            submissions,
            max_concurrent,
        })
    }

    fn validate(max_concurrent: usize) -> Result<(), QueueError> {
        if (MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrent) {
            Ok(())
        } else {
            Err(QueueError::InvalidConcurrency {
                value: max_concurrent,
            })
        }
    }

    /// Submits an operation. It starts once a slot frees up, in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ShutDown`] after [`cancel_all`](Self::cancel_all).
    pub fn add<Q: QueuedOperation>(&self, operation: Q) -> Result<(), QueueError> {
        let operation: Held = Arc::new(operation);
        let id = operation.id();
        {
            let mut held = self.shared.held();
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(QueueError::ShutDown);
            }
            held.insert(id, Arc::clone(&operation));
        }
        self.shared.outstanding.send_modify(|n| *n += 1);

        if self.submissions.send(operation).is_err() {
            self.shared.release(id);
            return Err(QueueError::ShutDown);
        }
        debug!(operation = %id, "operation queued");
        Ok(())
    }

    /// Rejects further submissions and cancels every held operation.
    ///
    /// Each operation runs its own cancellation path; queued ones finish
    /// without starting any work.
    pub fn cancel_all(&self) {
        let held: Vec<Held> = {
            let held = self.shared.held();
            self.shared.closed.store(true, Ordering::SeqCst);
            held.values().cloned().collect()
        };
        info!(count = held.len(), "cancelling all queued operations");
        for operation in held {
            operation.cancel();
        }
    }

    /// Waits until every submitted operation is finished.
    pub async fn wait_until_drained(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        // The sender lives in `shared`, which this queue keeps alive.
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }

    /// Operations submitted and not yet finished.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Operations currently executing on behalf of the queue.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Returns the concurrency limit.
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Returns true once [`cancel_all`](Self::cancel_all) was called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

async fn dispatch(shared: Arc<Shared>, mut receiver: mpsc::UnboundedReceiver<Held>) {
    while let Some(operation) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&shared.semaphore).acquire_owned().await else {
            warn!("queue semaphore closed unexpectedly");
            break;
        };

        let id = operation.id();
        let mut state = operation.subscribe_state();
        shared.running.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = operation.start_queued(&shared.context) {
            // Started elsewhere: the queue still waits for it to finish.
            warn!(operation = %id, error = %e, "queued operation could not be started");
        }

        let shared = Arc::clone(&shared);
        shared.context.clone().spawn(async move {
            let _permit = permit;
            // The sender lives in the operation, which `operation` keeps alive.
            let _ = state.wait_for(|s| *s == OperationState::Finished).await;
            drop(operation);
            shared.running.fetch_sub(1, Ordering::SeqCst);
            shared.release(id);
            debug!(operation = %id, "queued operation finished");
        });
    }
    debug!("operation queue dispatcher stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::OperationError;
    use crate::operation::{Operation, OperationStrategy};

    struct Sleep(Duration);

    #[async_trait]
    impl OperationStrategy for Sleep {
        type Observer = ();

        fn observer(&self) {}

        async fn on_start(&mut self) -> Result<(), OperationError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_new_validates_concurrency() {
        assert_eq!(
            OperationQueue::new(0).unwrap_err(),
            QueueError::InvalidConcurrency { value: 0 }
        );
        assert_eq!(
            OperationQueue::new(101).unwrap_err(),
            QueueError::InvalidConcurrency { value: 101 }
        );
        assert_eq!(OperationQueue::new(1).unwrap().max_concurrent(), 1);
        assert_eq!(OperationQueue::new(100).unwrap().max_concurrent(), 100);
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        assert_eq!(
            OperationQueue::new(2).unwrap_err(),
            QueueError::Lifecycle(crate::operation::LifecycleError::NoExecutionContext)
        );
    }

    #[tokio::test]
    async fn test_runs_everything_and_drains() {
        let queue = OperationQueue::new(2).unwrap();
        let operations: Vec<_> = (0..4)
            .map(|_| Operation::new(Sleep(Duration::from_millis(5))))
            .collect();
        for operation in &operations {
            queue.add(operation.clone()).unwrap();
        }

        queue.wait_until_drained().await;
        assert_eq!(queue.operation_count(), 0);
        assert_eq!(queue.running_count(), 0);
        for operation in &operations {
            assert_eq!(operation.state(), OperationState::Finished);
            assert!(operation.outcome().unwrap().is_ok());
            assert_eq!(operation.finish_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_starts_in_fifo_order() {
        let queue = OperationQueue::new(1).unwrap();
        let first = Operation::new(Sleep(Duration::from_millis(50)));
        let second = Operation::new(Sleep(Duration::from_millis(1)));
        queue.add(first.clone()).unwrap();
        queue.add(second.clone()).unwrap();

        let mut first_state = first.subscribe_state();
        first_state
            .wait_for(|s| *s == OperationState::Executing)
            .await
            .unwrap();
        assert_eq!(second.state(), OperationState::Inited);

        queue.wait_until_drained().await;
        assert!(second.outcome().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_all_cancels_running_and_queued_then_rejects() {
        let queue = OperationQueue::new(1).unwrap();
        let running = Operation::new(Sleep(Duration::from_secs(60)));
        let waiting = Operation::new(Sleep(Duration::from_secs(60)));
        queue.add(running.clone()).unwrap();
        queue.add(waiting.clone()).unwrap();

        let mut running_state = running.subscribe_state();
        running_state
            .wait_for(|s| *s == OperationState::Executing)
            .await
            .unwrap();

        queue.cancel_all();
        tokio::time::timeout(Duration::from_secs(5), queue.wait_until_drained())
            .await
            .unwrap();

        assert!(running.error().unwrap().is_cancelled());
        assert!(waiting.error().unwrap().is_cancelled());
        assert!(queue.is_shut_down());

        let late = Operation::new(Sleep(Duration::ZERO));
        assert_eq!(queue.add(late.clone()).unwrap_err(), QueueError::ShutDown);
        assert_eq!(late.state(), OperationState::Inited);
    }

    #[tokio::test]
    async fn test_operation_started_elsewhere_still_counts_until_finished() {
        let queue = OperationQueue::new(1).unwrap();
        let operation = Operation::new(Sleep(Duration::from_millis(5)));
        operation.start().unwrap();
        queue.add(operation.clone()).unwrap();

        queue.wait_until_drained().await;
        assert!(operation.is_finished());
        assert_eq!(queue.operation_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_until_drained_on_empty_queue_returns() {
        let queue = OperationQueue::new(3).unwrap();
        queue.wait_until_drained().await;
        assert_eq!(queue.operation_count(), 0);
    }
}
