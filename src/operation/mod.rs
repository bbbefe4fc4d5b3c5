//! Generic cancellable operations with an explicit lifecycle.
//!
//! An [`Operation`] owns a strategy (see [`OperationStrategy`]) and drives it
//! through `Inited → Executing → Finished`. The state never regresses, the
//! outcome is published exactly once, and [`Operation::cancel`] may be called
//! from any thread at any time.
//!
//! # Example
//!
//! ```no_run
//! use video_downloader::operation::{Operation, OperationState, OperationStrategy};
//! use video_downloader::OperationError;
//!
//! struct Noop;
//!
//! #[async_trait::async_trait]
//! impl OperationStrategy for Noop {
//!     type Observer = ();
//!     fn observer(&self) {}
//!     async fn on_start(&mut self) -> Result<(), OperationError> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let operation = Operation::new(Noop);
//! operation.start()?;
//! assert!(operation.wait().await.is_ok());
//! assert_eq!(operation.state(), OperationState::Finished);
//! # Ok(())
//! # }
//! ```

mod context;
mod strategy;

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, warn};

pub use context::ExecutionContext;
pub use strategy::OperationStrategy;

use crate::error::OperationError;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an operation, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        Self(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Created, not started yet.
    Inited,
    /// Started; the strategy is running on the execution context.
    Executing,
    /// Outcome published. Terminal.
    Finished,
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Inited => "inited",
            Self::Executing => "executing",
            Self::Finished => "finished",
        };
        write!(f, "{label}")
    }
}

/// Programming errors raised when starting an operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// `start` was called after the operation left the inited state.
    #[error("operation {id} already started (state: {state})")]
    AlreadyStarted {
        /// The operation that was started twice.
        id: OperationId,
        /// The state found when starting.
        state: OperationState,
    },

    /// `start` was called on an operation that was already cancelled.
    #[error("operation {id} was cancelled before it started")]
    Cancelled {
        /// The cancelled operation.
        id: OperationId,
    },

    /// No execution context was configured and none is current.
    #[error("no execution context: start the operation inside a Tokio runtime")]
    NoExecutionContext,
}

struct Inner<S: OperationStrategy> {
    id: OperationId,
    context: Option<ExecutionContext>,
    state: watch::Sender<OperationState>,
    cancelled: AtomicBool,
    cancel_token: CancellationToken,
    outcome: OnceLock<Option<OperationError>>,
    finish_count: AtomicUsize,
    /// Checked out by the driver while executing, returned at finish.
    strategy: Mutex<Option<S>>,
    observer: S::Observer,
}

/// A cancellable unit of asynchronous work.
///
/// `Operation` is a cheap, cloneable handle; clones refer to the same
/// operation. The caller keeps a handle to read the outcome while a queue
/// drives execution.
pub struct Operation<S: OperationStrategy> {
    inner: Arc<Inner<S>>,
}

impl<S: OperationStrategy> Clone for Operation<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: OperationStrategy> fmt::Debug for Operation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<S: OperationStrategy> Operation<S> {
    /// Creates an operation that runs on the runtime it is started from.
    #[must_use]
    pub fn new(strategy: S) -> Self {
        Self::build(strategy, None)
    }

    /// Creates an operation bound to an explicit execution context.
    #[must_use]
    pub fn with_context(strategy: S, context: ExecutionContext) -> Self {
        Self::build(strategy, Some(context))
    }

    fn build(strategy: S, context: Option<ExecutionContext>) -> Self {
        let (state, _) = watch::channel(OperationState::Inited);
        let observer = strategy.observer();
        Self {
            inner: Arc::new(Inner {
                id: OperationId::next(),
                context,
                state,
                cancelled: AtomicBool::new(false),
                cancel_token: CancellationToken::new(),
                outcome: OnceLock::new(),
                finish_count: AtomicUsize::new(0),
                strategy: Mutex::new(Some(strategy)),
                observer,
            }),
        }
    }

    /// Returns the operation's identity.
    #[must_use]
    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> OperationState {
        *self.inner.state.borrow()
    }

    /// Returns true once the outcome has been published.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state() == OperationState::Finished
    }

    /// Returns the cancellation flag.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the execution context configured at construction, if any.
    #[must_use]
    pub fn context(&self) -> Option<&ExecutionContext> {
        self.inner.context.as_ref()
    }

    /// Returns the strategy's observer.
    #[must_use]
    pub fn observer(&self) -> &S::Observer {
        &self.inner.observer
    }

    /// Returns the number of times the outcome was published (0 or 1).
    #[must_use]
    pub fn finish_count(&self) -> usize {
        self.inner.finish_count.load(Ordering::SeqCst)
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<OperationState> {
        self.inner.state.subscribe()
    }

    /// Returns the outcome, or `None` while the operation is not finished.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<(), &OperationError>> {
        if !self.is_finished() {
            return None;
        }
        self.inner
            .outcome
            .get()
            .map(|error| error.as_ref().map_or(Ok(()), Err))
    }

    /// Returns the terminal error.
    ///
    /// `None` both on success and while the operation is not finished; use
    /// [`outcome`](Self::outcome) to tell the two apart.
    #[must_use]
    pub fn error(&self) -> Option<&OperationError> {
        self.outcome().and_then(Result::err)
    }

    /// Starts the operation.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Cancelled`] if the operation was cancelled,
    /// [`LifecycleError::AlreadyStarted`] on a second start, and
    /// [`LifecycleError::NoExecutionContext`] when no context is configured
    /// and the caller is outside a Tokio runtime.
    pub fn start(&self) -> Result<(), LifecycleError> {
        if self.is_cancelled() {
            return Err(LifecycleError::Cancelled { id: self.id() });
        }
        self.launch(None)
    }

    /// Requests cancellation. Safe from any thread, any number of times.
    ///
    /// If the operation is executing, the strategy's cancellation hook runs on
    /// the operation's execution context. Otherwise only the flag is recorded.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(operation = %self.id(), state = %self.state(), "cancel requested");
        self.inner.cancel_token.cancel();
    }

    /// Waits until the operation is finished and returns its outcome.
    ///
    /// # Errors
    ///
    /// Returns the operation's terminal error.
    pub async fn wait(&self) -> Result<(), &OperationError> {
        let mut receiver = self.inner.state.subscribe();
        // The sender lives in `inner`, which this handle keeps alive.
        let _ = receiver
            .wait_for(|state| *state == OperationState::Finished)
            .await;
        self.outcome().unwrap_or(Ok(()))
    }

    /// Reads the strategy once the operation is finished.
    ///
    /// Returns `None` before the operation finishes.
    pub fn inspect<R>(&self, f: impl FnOnce(&S) -> R) -> Option<R> {
        if !self.is_finished() {
            return None;
        }
        let guard = self
            .inner
            .strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f)
    }

    /// Moves the operation to executing and spawns its driver.
    ///
    /// Unlike [`start`](Self::start) this does not reject cancelled
    /// operations: they pass straight to finished with
    /// [`OperationError::Cancelled`].
    fn launch(&self, fallback: Option<&ExecutionContext>) -> Result<(), LifecycleError> {
        let context = match self.inner.context.as_ref().or(fallback) {
            Some(context) => context.clone(),
            None => ExecutionContext::current()?,
        };

        let mut rejected = None;
        self.inner.state.send_if_modified(|state| {
            if *state == OperationState::Inited {
                *state = OperationState::Executing;
                true
            } else {
                rejected = Some(*state);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(LifecycleError::AlreadyStarted {
                id: self.id(),
                state,
            });
        }

        let strategy = self
            .inner
            .strategy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(strategy) = strategy else {
            return Err(LifecycleError::AlreadyStarted {
                id: self.id(),
                state: self.state(),
            });
        };

        debug!(operation = %self.id(), "operation started");
        let span = debug_span!("operation", id = %self.id());
        context.spawn(drive(Arc::clone(&self.inner), strategy).instrument(span));
        Ok(())
    }
}

async fn drive<S: OperationStrategy>(inner: Arc<Inner<S>>, mut strategy: S) {
    let token = inner.cancel_token.clone();

    let error = if token.is_cancelled() {
        debug!("cancelled before start");
        Some(OperationError::Cancelled)
    } else {
        let started = {
            let run = AssertUnwindSafe(strategy.on_start()).catch_unwind();
            tokio::select! {
                biased;
                () = token.cancelled() => None,
                outcome = run => Some(outcome),
            }
        };
        match started {
            Some(Err(payload)) => {
                warn!("on_start hook panicked");
                Some(OperationError::hook_panic(payload.as_ref()))
            }
            Some(Ok(result)) if !token.is_cancelled() => result.err(),
            // Cancelled while on_start was in flight, or before its outcome was published.
            Some(Ok(_)) | None => cancel_requested(&mut strategy),
        }
    };

    finish(&inner, strategy, error).await;
}

fn cancel_requested<S: OperationStrategy>(strategy: &mut S) -> Option<OperationError> {
    match std::panic::catch_unwind(AssertUnwindSafe(|| strategy.on_cancel_requested())) {
        Ok(error) => Some(error),
        Err(payload) => {
            warn!("on_cancel_requested hook panicked");
            Some(OperationError::hook_panic(payload.as_ref()))
        }
    }
}

async fn finish<S: OperationStrategy>(
    inner: &Inner<S>,
    mut strategy: S,
    error: Option<OperationError>,
) {
    let cancelled = inner.cancelled.load(Ordering::SeqCst);
    let hook = AssertUnwindSafe(strategy.on_before_finish(error.as_ref(), cancelled))
        .catch_unwind()
        .await;
    let error = match hook {
        Ok(()) => error,
        Err(payload) => {
            warn!("on_before_finish hook panicked");
            error.or_else(|| Some(OperationError::hook_panic(payload.as_ref())))
        }
    };

    match &error {
        None => debug!("operation finished"),
        Some(e) => debug!(error = %e, code = ?e.code(), "operation finished with error"),
    }

    if inner.outcome.set(error).is_err() {
        warn!("operation outcome was already published");
        return;
    }
    inner.finish_count.fetch_add(1, Ordering::SeqCst);
    *inner
        .strategy
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = Some(strategy);
    inner.state.send_replace(OperationState::Finished);
}

/// Type-erased view of an operation, used by [`OperationQueue`](crate::queue::OperationQueue).
pub trait QueuedOperation: Send + Sync + 'static {
    /// Returns the operation's identity.
    fn id(&self) -> OperationId;

    /// Returns the current lifecycle state.
    fn state(&self) -> OperationState;

    /// Requests cancellation.
    fn cancel(&self);

    /// Subscribes to state changes.
    fn subscribe_state(&self) -> watch::Receiver<OperationState>;

    /// Starts the operation on its own context, or on `fallback` when it has none.
    ///
    /// Cancelled operations are started too and finish immediately.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError`] when the operation was already started or no
    /// context is available.
    fn start_queued(&self, fallback: &ExecutionContext) -> Result<(), LifecycleError>;
}

impl<S: OperationStrategy> QueuedOperation for Operation<S> {
    fn id(&self) -> OperationId {
        Operation::id(self)
    }

    fn state(&self) -> OperationState {
        Operation::state(self)
    }

    fn cancel(&self) {
        Operation::cancel(self);
    }

    fn subscribe_state(&self) -> watch::Receiver<OperationState> {
        Operation::subscribe_state(self)
    }

    fn start_queued(&self, fallback: &ExecutionContext) -> Result<(), LifecycleError> {
        self.launch(Some(fallback))
    }
}
