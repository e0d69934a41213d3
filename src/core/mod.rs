pub mod completable;
pub mod job;
pub mod context;
pub mod thread_pool;
pub mod shutdown;
/// basic std::sync types reexported here so that we can hook loom into them for
/// testing.
pub mod sync;

use crossbeam_deque::{Stealer, Steal, Worker as WorkerQueue};
use crossbeam_queue::ArrayQueue;
use crossbeam_utils::{Backoff, CachePadded};

use std::cell::RefCell;

use sync::{Arc, Mutex, Ordering, thread};
use job::Job;
use shutdown::Shutdown;
use thread_pool::{ThreadPool, ThreadPoolBuilder, ThreadPoolId, ThreadPoolRef};

// Use std's atomic type explicitly here because loom's doesn't support static initialization.
static NEXT_THREADPOOL_ID: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

/// Capacity of the global queue holding jobs submitted from outside any
/// worker. Running out of space here is a misconfiguration; the enqueue
/// path spins until the external queue accepts the job.
pub const UNASSIGNED_QUEUE_CAPACITY: usize = 2056;

/// Pushes onto a bounded queue, waiting out transient fullness.
pub(crate) fn emplace<T>(queue: &ArrayQueue<T>, mut value: T) {
    let backoff = Backoff::new();
    loop {
        match queue.push(value) {
            Ok(()) => return,
            Err(rejected) => {
                value = rejected;
                backoff.snooze();
            }
        }
    }
}

/// Data accessible by all workers from any thread.
pub(crate) struct Shared {
    /// Number of workers backed by threads the pool spawned.
    pub num_spawned: u32,
    /// Total worker slots, spawned plus attachable.
    pub num_workers: u32,
    /// One stealer per worker slot, indexed by worker index.
    pub stealers: Vec<CachePadded<Stealer<Arc<Job>>>>,
    /// Jobs submitted from outside any worker of this pool.
    pub unassigned: ArrayQueue<Arc<Job>>,
    /// state and logic to handle exiting.
    pub shutdown: Shutdown,
    /// Worker slots reserved for external threads calling `attach_as_worker`.
    pub reserved: Mutex<Vec<ReservedWorker>>,
    /// Join handles of the spawned worker threads, consumed by `wait_exit`.
    pub join_handles: Mutex<Vec<thread::JoinHandle<()>>>,
    /// A unique ID per thread pool so that jobs submitted from a worker
    /// of another pool take the out-of-pool path.
    pub id: ThreadPoolId,
    // A few hooks to observe worker lifecycle.
    pub hooks: ThreadPoolHooks,
}

pub(crate) fn init(params: ThreadPoolBuilder) -> ThreadPool {
    let num_spawned = params.worker_threads as usize;
    let num_workers = num_spawned + params.attachable_workers as usize;

    let mut stealers = Vec::with_capacity(num_workers);
    let mut queues = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        let queue = WorkerQueue::new_lifo();
        stealers.push(CachePadded::new(queue.stealer()));
        queues.push(Some(queue));
    }

    let shared = Arc::new(Shared {
        num_spawned: num_spawned as u32,
        num_workers: num_workers as u32,
        stealers,
        unassigned: ArrayQueue::new(UNASSIGNED_QUEUE_CAPACITY),
        shutdown: Shutdown::new(num_spawned as u32),
        reserved: Mutex::new(Vec::with_capacity(num_workers - num_spawned)),
        join_handles: Mutex::new(Vec::with_capacity(num_spawned)),
        id: ThreadPoolId(NEXT_THREADPOOL_ID.fetch_add(1, Ordering::Relaxed)),
        hooks: ThreadPoolHooks {
            start: params.start_handler,
            exit: params.exit_handler,
        },
    });

    for i in 0..num_spawned {
        let queue = queues[i].take().unwrap();
        let worker_shared = Arc::clone(&shared);

        let mut builder = thread::Builder::new()
            .name((params.name_handler)(i as u32));

        if let Some(stack_size) = params.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder.spawn(move || {
            profiling::register_thread!("Worker");

            WorkerThread::new(i as u32, queue, worker_shared).run();
        }).unwrap();

        shared.join_handles.lock().unwrap().push(handle);
    }

    for i in num_spawned..num_workers {
        shared.reserved.lock().unwrap().push(ReservedWorker {
            index: i as u32,
            queue: queues[i].take().unwrap(),
        });
    }

    ThreadPool::from_ref(ThreadPoolRef::from_shared(shared))
}

/// A worker slot waiting for an external thread to claim it.
pub(crate) struct ReservedWorker {
    pub index: u32,
    pub queue: WorkerQueue<Arc<Job>>,
}

/// The per-thread state of a running worker: its deque, the jobs it is
/// privately holding, and the slot the execution-context lookup reads.
///
/// Lives on the worker thread's stack for the duration of the run loop;
/// other threads only ever reach it through the stealer stored in
/// `Shared`.
pub(crate) struct WorkerThread {
    index: u32,
    queue: WorkerQueue<Arc<Job>>,
    /// Jobs that refused to run this turn (unmet prerequisite or refused
    /// resource handle), kept off-queue until the worker makes progress
    /// elsewhere.
    held: RefCell<Vec<Arc<Job>>>,
    active: RefCell<Option<Arc<Job>>>,
    shared: Arc<Shared>,
}

impl WorkerThread {
    pub fn new(index: u32, queue: WorkerQueue<Arc<Job>>, shared: Arc<Shared>) -> Self {
        WorkerThread {
            index,
            queue,
            held: RefCell::new(Vec::new()),
            active: RefCell::new(None),
            shared,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub fn active_job(&self) -> Option<Arc<Job>> {
        self.active.borrow().clone()
    }

    /// Owner-side push. Newly produced work lands at the LIFO end where
    /// this worker will see it first; stealers take the oldest work.
    pub fn push_local(&self, job: Arc<Job>) {
        self.queue.push(job);
    }

    /// Recovers the slot after an attached run so it can be handed to a
    /// later `attach_as_worker` call.
    pub fn into_reserved(self) -> ReservedWorker {
        ReservedWorker {
            index: self.index,
            queue: self.queue,
        }
    }

    pub fn run(&self) {
        context::enter_worker(self);

        if let Some(handler) = &self.shared.hooks.start {
            handler.run(self.index);
        }
        tracing::debug!(worker = self.index, pool = self.shared.id.0, "worker running");

        let backoff = Backoff::new();

        loop {
            if self.shared.shutdown.is_exiting() {
                break;
            }

            let Some(job) = self.acquire_next_job() else {
                // Nothing to do anywhere. Publish held jobs before idling
                // so another worker whose progress they are waiting on
                // can steal them.
                self.flush_held();
                backoff.snooze();
                continue;
            };
            backoff.reset();

            let terminal = {
                profiling::scope!("job");

                self.active.borrow_mut().replace(Arc::clone(&job));
                let terminal = unsafe { job.try_run() };
                self.active.borrow_mut().take();
                terminal
            };

            if terminal {
                drop(job);
                // A completion may have unblocked anything we were
                // holding; re-expose it to ourselves and to stealers.
                self.flush_held();
            } else {
                self.held.borrow_mut().push(job);
            }
        }

        context::leave_worker();

        if let Some(handler) = &self.shared.hooks.exit {
            handler.run(self.index);
        }
        tracing::debug!(worker = self.index, pool = self.shared.id.0, "worker stopped");

        self.shared.shutdown.worker_finished();
    }

    fn acquire_next_job(&self) -> Option<Arc<Job>> {
        if let Some(job) = self.queue.pop() {
            return Some(job);
        }

        if let Some(job) = self.shared.unassigned.pop() {
            return Some(job);
        }

        self.steal()
    }

    /// Attempt to steal one job, scanning the other workers in cyclic
    /// order starting one step past our own index.
    fn steal(&self) -> Option<Arc<Job>> {
        profiling::scope!("steal jobs");

        let num_workers = self.shared.stealers.len();
        for offset in 1..num_workers {
            let victim = (self.index as usize + offset) % num_workers;
            let stealer = &self.shared.stealers[victim];
            for _ in 0..50 {
                match stealer.steal() {
                    Steal::Success(job) => return Some(job),
                    Steal::Empty => break,
                    Steal::Retry => {}
                }
            }
        }

        None
    }

    fn flush_held(&self) {
        let mut held = self.held.borrow_mut();
        for job in held.drain(..) {
            self.queue.push(job);
        }
    }
}

pub(crate) struct ThreadPoolHooks {
    pub start: Option<Box<dyn WorkerHook>>,
    pub exit: Option<Box<dyn WorkerHook>>,
}

pub trait WorkerHook: Send + Sync {
    fn run(&self, worker_index: u32);
}

impl<F> WorkerHook for F where F: Fn(u32) + Send + Sync + 'static {
    fn run(&self, worker_index: u32) { self(worker_index) }
}
