//! Queue scheduler for [`AsyncFinishOperation`]s
//!
//! The queue only relies on the operations' observable surface: it starts an
//! operation when a slot is free and frees the slot when it observes
//! `is_finished` turning true.

use crate::operation::{AsyncFinishOperation, ChangePhase, ObservedKey, OperationId};
use std::collections::{HashMap, VecDeque};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, trace};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<AsyncFinishOperation>,
    running: HashMap<OperationId, AsyncFinishOperation>,
}

impl QueueState {
    fn len(&self) -> usize {
        self.pending.len() + self.running.len()
    }
}

struct QueueInner {
    handle: Handle,
    max_concurrent: usize,
    state: Mutex<QueueState>,
    idle: Notify,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn operation_finished(&self, id: OperationId) {
        {
            let mut state = self.lock();
            state.running.remove(&id);
            state.pending.retain(|op| op.id() != id);
        }
        trace!(operation = %id, "dequeued");
        self.pump();
    }

    fn pump(&self) {
        let ready = {
            let mut state = self.lock();
            let mut ready = Vec::new();
            while state.running.len() < self.max_concurrent {
                let Some(op) = state.pending.pop_front() else {
                    break;
                };
                // Cancelled while waiting; its observer already fired.
                if op.is_finished() {
                    continue;
                }
                state.running.insert(op.id(), op.clone());
                ready.push(op);
            }
            if state.len() == 0 {
                self.idle.notify_waiters();
            }
            ready
        };

        for op in ready {
            trace!(operation = %op.id(), "scheduling");
            // Work routines may block their thread until they complete.
            self.handle.spawn_blocking(move || op.start());
        }
    }
}

/// Runs operations with bounded concurrency
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

impl OperationQueue {
    /// Create a queue running at most `max_concurrent` operations at a time
    ///
    /// Operations are started on `handle`'s blocking pool. A limit of zero
    /// is treated as one.
    pub fn new(handle: Handle, max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                handle,
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(QueueState::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Create a serial queue
    pub fn serial(handle: Handle) -> Self {
        Self::new(handle, 1)
    }

    /// Maximum number of concurrently running operations
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Enqueue an operation
    pub fn add_operation(&self, op: AsyncFinishOperation) {
        let queue: Weak<QueueInner> = Arc::downgrade(&self.inner);
        let id = op.id();
        op.add_observer(move |key, phase| {
            if key == ObservedKey::IsFinished && phase == ChangePhase::Did {
                if let Some(queue) = queue.upgrade() {
                    queue.operation_finished(id);
                }
            }
        });

        debug!(operation = %id, "enqueued");
        self.inner.lock().pending.push_back(op);
        self.inner.pump();
    }

    /// Number of operations not yet finished
    pub fn operation_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Cancel every queued and running operation
    pub fn cancel_all(&self) {
        let ops: Vec<AsyncFinishOperation> = {
            let state = self.inner.lock();
            // Pending first, so freed slots are not handed to them.
            state
                .pending
                .iter()
                .cloned()
                .chain(state.running.values().cloned())
                .collect()
        };
        debug!(count = ops.len(), "cancelling all operations");
        for op in ops {
            op.cancel();
        }
    }

    /// Wait until the queue holds no unfinished operation
    pub async fn wait_until_all_finished(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            notified.as_mut().enable();
            if self.operation_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("OperationQueue")
            .field("max_concurrent", &self.inner.max_concurrent)
            .field("pending", &state.pending.len())
            .field("running", &state.running.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationState;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn within<F: std::future::Future>(fut: F) -> impl std::future::Future<Output = F::Output> {
        async move {
            tokio::time::timeout(Duration::from_secs(5), fut)
                .await
                .expect("timed out")
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runs_all_operations() {
        let queue = OperationQueue::new(Handle::current(), 2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = counter.clone();
            queue.add_operation(AsyncFinishOperation::new(move |_probe, done| {
                counter.fetch_add(1, Ordering::SeqCst);
                done.finish();
            }));
        }

        within(queue.wait_until_all_finished()).await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(queue.operation_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_serial_queue_never_overlaps() {
        let queue = OperationQueue::serial(Handle::current());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let (active, peak) = (active.clone(), peak.clone());
            queue.add_operation(AsyncFinishOperation::new(move |_probe, done| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
                done.finish();
            }));
        }

        within(queue.wait_until_all_finished()).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_all_releases_stuck_operations() {
        let queue = OperationQueue::serial(Handle::current());
        let started = Arc::new(AtomicUsize::new(0));

        let mut ops = Vec::new();
        for _ in 0..3 {
            let started = started.clone();
            // Never signals completion.
            let op = AsyncFinishOperation::new(move |_probe, _done| {
                started.fetch_add(1, Ordering::SeqCst);
            });
            ops.push(op.clone());
            queue.add_operation(op);
        }

        within(async {
            while started.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        queue.cancel_all();
        within(queue.wait_until_all_finished()).await;

        assert!(ops.iter().all(|op| op.state() == OperationState::Finished));
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_operation_is_skipped() {
        let queue = OperationQueue::serial(Handle::current());
        let ran = Arc::new(AtomicUsize::new(0));

        let r = ran.clone();
        let op = AsyncFinishOperation::new(move |_probe, done| {
            r.fetch_add(1, Ordering::SeqCst);
            done.finish();
        });
        op.cancel();
        queue.add_operation(op);

        within(queue.wait_until_all_finished()).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle() {
        let queue = OperationQueue::new(Handle::current(), 0);
        assert_eq!(queue.max_concurrent(), 1);
        within(queue.wait_until_all_finished()).await;
    }
}
