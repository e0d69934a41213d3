//! The execution-context lookup.
//!
//! A process-wide thread-local points at the state of the worker
//! currently running on this thread, or is null everywhere else. It is
//! the sole mechanism by which a running job discovers the pool it
//! belongs to, so that job bodies can enqueue further work without the
//! pool being threaded through application code.

use std::cell::Cell;
use std::ptr;

use crate::core::job::Job;
use crate::core::thread_pool::ThreadPoolRef;
use crate::core::sync::Arc;
use crate::core::{Shared, WorkerThread};

thread_local! {
    static CURRENT_WORKER: Cell<*const WorkerThread> = const { Cell::new(ptr::null()) };
}

/// Installs `worker` as this thread's execution context for the duration
/// of its run loop. The pointer is only dereferenced from this same
/// thread, and `leave_worker` clears it before the worker state goes out
/// of scope.
pub(crate) fn enter_worker(worker: &WorkerThread) {
    CURRENT_WORKER.with(|cell| {
        debug_assert!(cell.get().is_null());
        cell.set(worker);
    });
}

pub(crate) fn leave_worker() {
    CURRENT_WORKER.with(|cell| cell.set(ptr::null()));
}

pub(crate) fn is_worker_thread() -> bool {
    CURRENT_WORKER.with(|cell| !cell.get().is_null())
}

/// True when the calling thread is currently a worker of the given pool.
pub(crate) fn is_worker_of(shared: &Arc<Shared>) -> bool {
    CURRENT_WORKER.with(|cell| {
        let ptr = cell.get();
        if ptr.is_null() {
            return false;
        }
        let worker = unsafe { &*ptr };
        worker.shared().id == shared.id
    })
}

/// Pushes onto the local deque when called from a worker of the target
/// pool. Returns the job back to the caller otherwise.
pub(crate) fn try_push_local(shared: &Arc<Shared>, job: Arc<Job>) -> Option<Arc<Job>> {
    CURRENT_WORKER.with(|cell| {
        let ptr = cell.get();
        if ptr.is_null() {
            return Some(job);
        }
        let worker = unsafe { &*ptr };
        if worker.shared().id != shared.id {
            return Some(job);
        }
        worker.push_local(job);
        None
    })
}

/// What a running job can learn about where it is running.
pub struct ExecutionContext {
    pool: ThreadPoolRef,
    worker_index: u32,
    active_job: Option<Arc<Job>>,
}

impl ExecutionContext {
    /// The pool whose worker is running the current thread. The returned
    /// handle carries the full enqueue surface.
    pub fn pool(&self) -> &ThreadPoolRef {
        &self.pool
    }

    pub fn worker_index(&self) -> u32 {
        self.worker_index
    }

    /// The job the worker is currently executing. `None` between jobs
    /// (for example when called from a start or exit handler).
    pub fn active_job(&self) -> Option<&Arc<Job>> {
        self.active_job.as_ref()
    }
}

/// Returns the calling thread's execution context, or `None` on threads
/// that are not currently serving as a worker.
pub fn get_execution_context() -> Option<ExecutionContext> {
    CURRENT_WORKER.with(|cell| {
        let ptr = cell.get();
        if ptr.is_null() {
            return None;
        }
        let worker = unsafe { &*ptr };
        Some(ExecutionContext {
            pool: ThreadPoolRef::from_shared(worker.shared().clone()),
            worker_index: worker.index(),
            active_job: worker.active_job(),
        })
    })
}
