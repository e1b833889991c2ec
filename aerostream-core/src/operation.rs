//! Cancellable asynchronous operations
//!
//! [`AsyncFinishOperation`] adapts a unit of asynchronous work to schedulers
//! that track tasks through two observable flags, `is_executing` and
//! `is_finished`, and that cancel cooperatively.
//!
//! The work routine receives a [`CancellationProbe`] and a
//! [`CompletionSignal`]. The operation owns the terminal transition: calling
//! [`AsyncFinishOperation::cancel`] reports the operation as finished at once,
//! whether or not the work ever signals completion. Cancelling is a request to
//! stop; side effects the work already produced are not rolled back.

use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;
use tracing::trace;

type Work = Box<dyn FnOnce(CancellationProbe, CompletionSignal) + Send>;

/// Callback invoked around every change of an observed flag
pub type Observer = Arc<dyn Fn(ObservedKey, ChangePhase) + Send + Sync>;

static NEXT_OPERATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        Self(NEXT_OPERATION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Flag of the observable surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObservedKey {
    /// `is_executing`
    IsExecuting,
    /// `is_finished`
    IsFinished,
}

/// Position of a notification relative to the mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangePhase {
    /// Sent before the flag changes
    Will,
    /// Sent after the flag changed
    Did,
}

/// Lifecycle state derived from the two flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Not started yet
    Pending,
    /// Work invoked, completion not signalled
    Executing,
    /// Terminal
    Finished,
}

struct Inner {
    id: OperationId,
    executing: AtomicBool,
    finished: AtomicBool,
    cancelled: AtomicBool,
    // Held across will/mutate/did so transitions never interleave.
    transition: Mutex<()>,
    work: Mutex<Option<Work>>,
    observers: Mutex<Vec<Observer>>,
    done: Notify,
}

impl Inner {
    fn lock_transition(&self) -> MutexGuard<'_, ()> {
        self.transition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_work(&self) -> Option<Work> {
        self.work.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn notify(&self, key: ObservedKey, phase: ChangePhase) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer(key, phase);
        }
    }

    /// Caller must hold the transition lock.
    fn set_flag(&self, key: ObservedKey, value: bool) {
        let flag = match key {
            ObservedKey::IsExecuting => &self.executing,
            ObservedKey::IsFinished => &self.finished,
        };
        if flag.load(Ordering::SeqCst) == value {
            return;
        }

        self.notify(key, ChangePhase::Will);
        flag.store(value, Ordering::SeqCst);
        self.notify(key, ChangePhase::Did);
    }

    /// Caller must hold the transition lock.
    fn mark_finished(&self) {
        self.set_flag(ObservedKey::IsExecuting, false);
        self.set_flag(ObservedKey::IsFinished, true);
        self.done.notify_waiters();
    }
}

/// Task object for queue-based schedulers
///
/// Cloning yields another handle to the same operation.
#[derive(Clone)]
pub struct AsyncFinishOperation {
    inner: Arc<Inner>,
}

impl AsyncFinishOperation {
    /// Wrap a work routine
    ///
    /// The routine runs at most once, on the thread that calls
    /// [`start`](Self::start), and may block it. It reports completion through
    /// the [`CompletionSignal`], from any thread and at any later time.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(CancellationProbe, CompletionSignal) + Send + 'static,
    {
        Self {
            inner: Arc::new(Inner {
                id: OperationId::next(),
                executing: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                transition: Mutex::new(()),
                work: Mutex::new(Some(Box::new(work))),
                observers: Mutex::new(Vec::new()),
                done: Notify::new(),
            }),
        }
    }

    /// Wrap a future produced from the cancellation probe
    ///
    /// Starting the operation spawns the future on `handle`; completion is
    /// signalled when the future resolves.
    pub fn from_future<F, Fut>(handle: tokio::runtime::Handle, work: F) -> Self
    where
        F: FnOnce(CancellationProbe) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(move |probe, done| {
            handle.spawn(async move {
                work(probe).await;
                done.finish();
            });
        })
    }

    /// Identifier of this operation
    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    /// Whether the work is running
    pub fn is_executing(&self) -> bool {
        self.inner.executing.load(Ordering::SeqCst)
    }

    /// Whether the operation reached its terminal state
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    pub fn state(&self) -> OperationState {
        if self.is_finished() {
            OperationState::Finished
        } else if self.is_executing() {
            OperationState::Executing
        } else {
            OperationState::Pending
        }
    }

    /// Register a callback for flag changes
    ///
    /// Observers run while the transition is in progress. They may read the
    /// flags of this operation but must not start, cancel or complete it.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: Fn(ObservedKey, ChangePhase) + Send + Sync + 'static,
    {
        self.inner
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    /// Begin the operation
    ///
    /// No-op once started or finished. An operation cancelled before this
    /// call is already finished, so its work never runs.
    pub fn start(&self) {
        let work = {
            let _transition = self.inner.lock_transition();
            // `cancel` sets `finished` in the same transition as `cancelled`.
            if self.is_finished() || self.is_executing() {
                return;
            }

            trace!(operation = %self.id(), "starting");
            self.inner.set_flag(ObservedKey::IsExecuting, true);
            self.inner.take_work()
        };

        if let Some(work) = work {
            let weak = Arc::downgrade(&self.inner);
            work(
                CancellationProbe {
                    inner: weak.clone(),
                },
                CompletionSignal { inner: weak },
            );
        }
    }

    /// Request cancellation
    ///
    /// Reports the operation as finished immediately. Running work is
    /// expected to notice through its probe and stop; the state machine
    /// does not wait for it. No-op once finished.
    pub fn cancel(&self) {
        let pending_work = {
            let _transition = self.inner.lock_transition();
            if self.is_finished() {
                return;
            }

            trace!(operation = %self.id(), executing = self.is_executing(), "cancelled");
            self.inner.cancelled.store(true, Ordering::SeqCst);
            self.inner.mark_finished();
            self.inner.take_work()
        };
        drop(pending_work);
    }

    /// Wait until the operation is finished
    pub async fn finished(&self) {
        loop {
            let mut notified = pin!(self.inner.done.notified());
            notified.as_mut().enable();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }

    /// Probe observing this operation's cancellation flag
    pub fn cancellation_probe(&self) -> CancellationProbe {
        CancellationProbe {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for AsyncFinishOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncFinishOperation")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Read-only view of an operation's cancellation flag
///
/// Reports `true` once the operation is gone.
#[derive(Clone)]
pub struct CancellationProbe {
    inner: Weak<Inner>,
}

impl CancellationProbe {
    /// Whether the work should stop
    pub fn is_cancelled(&self) -> bool {
        self.inner
            .upgrade()
            .map_or(true, |inner| inner.cancelled.load(Ordering::SeqCst))
    }
}

impl fmt::Debug for CancellationProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationProbe")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Handle the work uses to report completion
///
/// Only the first call on a running, uncancelled operation has an effect.
#[derive(Clone)]
pub struct CompletionSignal {
    inner: Weak<Inner>,
}

impl CompletionSignal {
    /// Report the work as done
    pub fn finish(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };

        let _transition = inner.lock_transition();
        if inner.cancelled.load(Ordering::SeqCst) || inner.finished.load(Ordering::SeqCst) {
            return;
        }
        trace!(operation = %inner.id, "completed");
        inner.mark_finished();
    }
}

impl fmt::Debug for CompletionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSignal").finish_non_exhaustive()
    }
}
