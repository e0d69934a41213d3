/// Shutdown
///
/// Workers check whether the pool is exiting by reading an atomic that is
/// set when `exit` is called. A mutex/condvar pair tracks the number of
/// workers still running (spawned and attached alike) so `wait_exit` can
/// wait for everyone but the calling thread's own worker.

use crate::core::sync::{Ordering, AtomicBool, Mutex, Condvar};

pub(crate) struct Shutdown {
    exiting: AtomicBool,
    running_workers: Mutex<u32>,
    cond: Condvar,
}

impl Shutdown {
    pub fn new(spawned_workers: u32) -> Self {
        Shutdown {
            exiting: AtomicBool::new(false),
            running_workers: Mutex::new(spawned_workers),
            cond: Condvar::new(),
        }
    }

    pub fn begin_exit(&self) {
        self.exiting.store(true, Ordering::SeqCst);
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// An external thread became a worker via attach.
    pub fn worker_started(&self) {
        let mut running = self.running_workers.lock().unwrap();
        *running += 1;
    }

    pub fn worker_finished(&self) {
        let mut running = self.running_workers.lock().unwrap();
        *running -= 1;
        // Waiters may be waiting for any remaining count, not just zero.
        self.cond.notify_all();
    }

    /// Blocks until at most `remaining` workers are still running.
    /// `remaining` is 1 when the caller is itself a worker of this pool
    /// and therefore cannot wait for its own loop to end.
    pub fn wait_workers(&self, remaining: u32) {
        let mut running = self.running_workers.lock().unwrap();
        while *running > remaining {
            running = self.cond.wait(running).unwrap();
        }
    }
}
