//! Bounded, priority-ordered worker pool.
//!
//! Work items are ordered by their live priority (higher first) and then by
//! submission sequence (older first). The number of concurrently running
//! items is resizable at runtime.

use std::cmp::Reverse;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::debug;

use crate::domain::entities::SharedPriority;
use crate::domain::network::NetworkCapabilities;

/// Worker count used when nothing is known about the network.
pub const DEFAULT_THREAD_COUNT: usize = 3;

const BROADBAND_THREAD_COUNT: usize = 4;
const CELLULAR_THREAD_COUNT: usize = 2;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Returned when work is submitted to an executor that has been shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("executor has been shut down")]
pub struct RejectedExecution;

/// Handle to one submitted work item.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    state: Arc<AtomicU8>,
}

impl TaskHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// A handle for work that is waiting outside the executor, such as a
    /// retry backoff. It can be cancelled like a queued item.
    #[must_use]
    pub fn detached() -> Self {
        Self::new()
    }

    /// Cancels the item if it has not started yet.
    ///
    /// Returns false if the item is already running or finished.
    pub fn cancel(&self) -> bool {
        self.state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            || self.is_cancelled()
    }

    /// Returns true if the item was cancelled before it started.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Returns true once the item has run to completion.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == DONE
    }

    fn begin(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.state.store(DONE, Ordering::Release);
    }
}

struct QueuedJob {
    priority: SharedPriority,
    sequence: u64,
    handle: TaskHandle,
    job: Job,
}

struct State {
    queue: Vec<QueuedJob>,
    active: usize,
    thread_count: usize,
    next_sequence: u64,
    shutdown: bool,
}

struct Inner {
    state: Mutex<State>,
    runtime: Handle,
    baseline: usize,
}

/// Priority-ordered pool running at most `thread_count` items at once.
#[derive(Clone)]
pub struct PriorityExecutor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PriorityExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("PriorityExecutor")
            .field("queued", &state.queue.len())
            .field("active", &state.active)
            .field("thread_count", &state.thread_count)
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

impl PriorityExecutor {
    /// Creates an executor that spawns its workers on `runtime`.
    ///
    /// `thread_count` is also the baseline restored when connectivity is lost.
    #[must_use]
    pub fn new(thread_count: usize, runtime: Handle) -> Self {
        let thread_count = thread_count.max(1);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: Vec::new(),
                    active: 0,
                    thread_count,
                    next_sequence: 0,
                    shutdown: false,
                }),
                runtime,
                baseline: thread_count,
            }),
        }
    }

    /// Queues `job` with a priority that may change while it waits.
    ///
    /// # Errors
    /// Returns [`RejectedExecution`] after [`shutdown`](Self::shutdown).
    pub fn submit<F>(&self, priority: SharedPriority, job: F) -> Result<TaskHandle, RejectedExecution>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = TaskHandle::new();
        {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return Err(RejectedExecution);
            }
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.queue.push(QueuedJob {
                priority,
                sequence,
                handle: handle.clone(),
                job: Box::pin(job),
            });
        }
        pump(&self.inner);
        Ok(handle)
    }

    /// Returns the current worker limit.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.inner.state.lock().thread_count
    }

    /// Returns the number of items waiting to run.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Changes the worker limit. Running items are never interrupted.
    pub fn set_thread_count(&self, thread_count: usize) {
        let thread_count = thread_count.max(1);
        self.inner.state.lock().thread_count = thread_count;
        debug!(thread_count, "executor resized");
        pump(&self.inner);
    }

    /// Resizes the pool for the given network.
    ///
    /// Broadband transports raise the limit, cellular lowers it, and no
    /// connectivity restores the baseline.
    pub fn adjust_thread_count(&self, capabilities: Option<&NetworkCapabilities>) {
        self.set_thread_count(thread_count_for(capabilities, self.inner.baseline));
    }

    /// Returns true after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.state.lock().shutdown
    }

    /// Rejects further submissions and cancels everything still queued.
    ///
    /// Running items are abandoned, not awaited.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            std::mem::take(&mut state.queue)
        };
        for queued in &drained {
            queued.handle.cancel();
        }
        debug!(cancelled = drained.len(), "executor shut down");
    }
}

fn thread_count_for(capabilities: Option<&NetworkCapabilities>, baseline: usize) -> usize {
    match capabilities {
        Some(caps) if caps.is_connected() && caps.is_broadband() => BROADBAND_THREAD_COUNT,
        Some(caps) if caps.is_connected() && caps.is_cellular() => CELLULAR_THREAD_COUNT,
        _ => baseline,
    }
}

/// Starts queued items while there are free workers.
fn pump(inner: &Arc<Inner>) {
    let mut ready = Vec::new();
    {
        let mut state = inner.state.lock();
        state.queue.retain(|queued| !queued.handle.is_cancelled());
        while state.active < state.thread_count {
            let Some(index) = next_index(&state.queue) else {
                break;
            };
            let queued = state.queue.swap_remove(index);
            if queued.handle.begin() {
                state.active += 1;
                ready.push(queued);
            }
        }
    }

    for queued in ready {
        let guard = WorkerGuard {
            inner: inner.clone(),
            handle: queued.handle,
        };
        inner.runtime.spawn(async move {
            let _guard = guard;
            queued.job.await;
        });
    }
}

fn next_index(queue: &[QueuedJob]) -> Option<usize> {
    queue
        .iter()
        .enumerate()
        .max_by_key(|(_, queued)| (queued.priority.get(), Reverse(queued.sequence)))
        .map(|(index, _)| index)
}

/// Marks a running item done and frees its worker slot when it ends, even
/// by panic.
struct WorkerGuard {
    inner: Arc<Inner>,
    handle: TaskHandle,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.handle.finish();
        self.inner.state.lock().active -= 1;
        pump(&self.inner);
    }
}
