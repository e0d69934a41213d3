use std::ops::{Deref, Range};

use thiserror::Error;

use super::{context, emplace, Shared, WorkerHook, WorkerThread};
use super::completable::Completable;
use super::job::{Job, JobBody};
use super::sync::{thread, Arc};
use crate::for_each::for_each_jobs;
use crate::helpers::{data_job_body, shared_resource_job_body};
use crate::input::InputCell;
use crate::resource::ProviderSet;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ThreadPoolId(pub(crate) u32);

/// The owner of a thread pool.
///
/// There is exactly one of these per pool; dropping it calls
/// [`wait_exit`](ThreadPoolRef::wait_exit). The full submission surface
/// lives on [`ThreadPoolRef`], which this type derefs to and which can
/// be freely cloned and handed around (running jobs reach it through
/// [`get_execution_context`](crate::get_execution_context)).
pub struct ThreadPool {
    inner: ThreadPoolRef,
}

impl ThreadPool {
    pub fn builder() -> ThreadPoolBuilder {
        ThreadPoolBuilder {
            worker_threads: default_worker_count(),
            attachable_workers: 0,
            start_handler: None,
            exit_handler: None,
            name_handler: Box::new(|idx| format!("Worker#{}", idx)),
            stack_size: None,
        }
    }

    pub(crate) fn from_ref(inner: ThreadPoolRef) -> ThreadPool {
        ThreadPool { inner }
    }

    /// A cloneable handle to this pool.
    pub fn handle(&self) -> ThreadPoolRef {
        self.inner.clone()
    }
}

impl Deref for ThreadPool {
    type Target = ThreadPoolRef;
    fn deref(&self) -> &ThreadPoolRef {
        &self.inner
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.inner.wait_exit();
    }
}

/// Why `attach_as_worker` refused the calling thread.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum AttachError {
    /// The calling thread is already inside an execution context, on
    /// this pool or another.
    #[error("thread is already serving as a worker")]
    AlreadyWorker,
    /// Every reserved worker slot is currently claimed.
    #[error("no attachable worker slot remaining")]
    MaxAttached,
}

/// A reference to a thread pool, carrying the whole submission surface.
#[derive(Clone)]
pub struct ThreadPoolRef {
    pub(crate) shared: Arc<Shared>,
}

impl ThreadPoolRef {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> ThreadPoolRef {
        ThreadPoolRef { shared }
    }

    pub fn id(&self) -> ThreadPoolId {
        self.shared.id
    }

    /// Number of workers backed by threads the pool spawned.
    pub fn worker_count(&self) -> u32 {
        self.shared.num_spawned
    }

    /// Number of worker slots reserved for `attach_as_worker`.
    pub fn attachable_worker_count(&self) -> u32 {
        self.shared.num_workers - self.shared.num_spawned
    }

    /// Submits a plain job. The body runs once, after which the job is
    /// done.
    pub fn enqueue_job<F>(&self, body: F) -> Arc<Job>
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Job::new(JobBody::Run(Some(Box::new(body))));
        self.schedule(Arc::clone(&job));
        job
    }

    /// Submits a job gated on one prerequisite.
    pub fn enqueue_job_after<F>(&self, body: F, prerequisite: Arc<dyn Completable>) -> Arc<Job>
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue_job_after_all(body, [prerequisite])
    }

    /// Submits a job gated on a sequence of prerequisites.
    pub fn enqueue_job_after_all<F, I>(&self, body: F, prerequisites: I) -> Arc<Job>
    where
        F: FnOnce() + Send + 'static,
        I: IntoIterator<Item = Arc<dyn Completable>>,
    {
        let job = Job::new(JobBody::Run(Some(Box::new(body))));
        for prerequisite in prerequisites {
            job.add_prerequisite(prerequisite);
        }
        self.schedule(Arc::clone(&job));
        job
    }

    /// Submits a job whose input arrives later through the returned
    /// cell. The job stays pending until `cell.submit(..)` lands, then
    /// runs the body over the stored value.
    pub fn enqueue_data_job<T, F>(&self, body: F) -> (Arc<Job>, Arc<InputCell<T>>)
    where
        T: Default + Send + Sync + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        let cell = Arc::new(InputCell::default());
        let job = Job::new(data_job_body(Arc::clone(&cell), body));
        self.schedule(Arc::clone(&job));
        (job, cell)
    }

    /// `enqueue_data_job` with one extra prerequisite besides the cell.
    pub fn enqueue_data_job_after<T, F>(
        &self,
        body: F,
        prerequisite: Arc<dyn Completable>,
    ) -> (Arc<Job>, Arc<InputCell<T>>)
    where
        T: Default + Send + Sync + 'static,
        F: FnOnce(&T) + Send + 'static,
    {
        let cell = Arc::new(InputCell::default());
        let job = Job::new(data_job_body(Arc::clone(&cell), body));
        job.add_prerequisite(prerequisite);
        self.schedule(Arc::clone(&job));
        (job, cell)
    }

    /// Submits a job that runs once it can acquire a handle from every
    /// provider in the set (acquired left to right, all released on the
    /// first refusal). Until then the job is held and retried.
    pub fn enqueue_shared_resource_job<P, F>(&self, body: F, providers: P) -> Arc<Job>
    where
        P: ProviderSet,
        F: FnOnce(P::Guards) + Send + 'static,
    {
        let job = Job::new(shared_resource_job_body(providers, body));
        self.schedule(Arc::clone(&job));
        job
    }

    /// `enqueue_shared_resource_job` gated on a prerequisite.
    pub fn enqueue_shared_resource_job_after<P, F>(
        &self,
        body: F,
        providers: P,
        prerequisite: Arc<dyn Completable>,
    ) -> Arc<Job>
    where
        P: ProviderSet,
        F: FnOnce(P::Guards) + Send + 'static,
    {
        let job = Job::new(shared_resource_job_body(providers, body));
        job.add_prerequisite(prerequisite);
        self.schedule(Arc::clone(&job));
        job
    }

    /// Splits `range` into one contiguous chunk per worker (never more
    /// chunks than elements) and submits each chunk as a job invoking
    /// `body` per index. Returns every chunk job.
    pub fn for_each<F>(&self, range: Range<usize>, body: F) -> Vec<Arc<Job>>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        for_each_jobs(self, range, None, body)
    }

    /// `for_each` with a prerequisite wired into every chunk job.
    pub fn for_each_after<F>(
        &self,
        range: Range<usize>,
        prerequisite: Arc<dyn Completable>,
        body: F,
    ) -> Vec<Arc<Job>>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        for_each_jobs(self, range, Some(prerequisite), body)
    }

    /// Turns the calling thread into a worker until the pool exits.
    ///
    /// On success the call blocks for the pool's whole remaining
    /// lifetime, serving jobs, and returns once `exit` has been
    /// observed.
    pub fn attach_as_worker(&self) -> Result<(), AttachError> {
        if context::is_worker_thread() {
            return Err(AttachError::AlreadyWorker);
        }

        let slot = self.shared.reserved.lock().unwrap().pop();
        let Some(slot) = slot else {
            return Err(AttachError::MaxAttached);
        };

        self.shared.shutdown.worker_started();
        tracing::debug!(worker = slot.index, pool = self.shared.id.0, "thread attached as worker");

        let worker = WorkerThread::new(slot.index, slot.queue, Arc::clone(&self.shared));
        worker.run();

        self.shared.reserved.lock().unwrap().push(worker.into_reserved());
        Ok(())
    }

    /// Asks all workers to stop. Queued and held jobs that have not
    /// started will never run; the contract is "no new job starts", not
    /// "pending jobs complete".
    pub fn exit(&self) {
        tracing::debug!(pool = self.shared.id.0, "exit requested");
        self.shared.shutdown.begin_exit();
    }

    /// Calls `exit` and waits for the workers to stop.
    ///
    /// Joins the spawned worker threads, skipping the caller's own
    /// thread, then waits until no worker of this pool other than
    /// (possibly) the caller's own is running. Returns false when called
    /// from a worker of this pool, whose own loop cannot be torn down by
    /// this call.
    pub fn wait_exit(&self) -> bool {
        self.exit();

        let caller_is_worker = context::is_worker_of(&self.shared);
        let caller_id = thread::current().id();

        let handles = std::mem::take(&mut *self.shared.join_handles.lock().unwrap());
        for handle in handles {
            if handle.thread().id() == caller_id {
                continue;
            }
            let _ = handle.join();
        }

        let remaining = if caller_is_worker { 1 } else { 0 };
        self.shared.shutdown.wait_workers(remaining);

        !caller_is_worker
    }

    pub(crate) fn schedule(&self, job: Arc<Job>) {
        profiling::scope!("schedule_job");

        // In-pool submissions stay on the submitting worker's deque for
        // locality; everything else funnels through the shared queue
        // where stealing load-balances it.
        if let Some(job) = context::try_push_local(&self.shared, job) {
            emplace(&self.shared.unassigned, job);
        }
    }
}

fn default_worker_count() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

pub struct ThreadPoolBuilder {
    pub(crate) worker_threads: u32,
    pub(crate) attachable_workers: u32,
    pub(crate) start_handler: Option<Box<dyn WorkerHook>>,
    pub(crate) exit_handler: Option<Box<dyn WorkerHook>>,
    pub(crate) name_handler: Box<dyn Fn(u32) -> String>,
    pub(crate) stack_size: Option<usize>,
}

impl ThreadPoolBuilder {
    pub fn with_start_handler<F>(self, handler: F) -> Self
    where F: Fn(u32) + Send + Sync + 'static
    {
        ThreadPoolBuilder {
            start_handler: Some(Box::new(handler)),
            ..self
        }
    }

    pub fn with_exit_handler<F>(self, handler: F) -> Self
    where F: Fn(u32) + Send + Sync + 'static
    {
        ThreadPoolBuilder {
            exit_handler: Some(Box::new(handler)),
            ..self
        }
    }

    pub fn with_thread_names<F>(self, handler: F) -> Self
    where F: Fn(u32) -> String + 'static
    {
        ThreadPoolBuilder {
            name_handler: Box::new(handler),
            ..self
        }
    }

    pub fn with_worker_threads(mut self, worker_threads: u32) -> Self {
        self.worker_threads = worker_threads.max(1);

        self
    }

    /// Reserve worker slots that external threads can claim with
    /// `attach_as_worker`.
    pub fn with_attachable_workers(mut self, attachable_workers: u32) -> Self {
        self.attachable_workers = attachable_workers;

        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);

        self
    }

    pub fn build(self) -> ThreadPool {
        crate::core::init(self)
    }
}
