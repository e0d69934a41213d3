use std::cell::UnsafeCell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crossbeam_queue::ArrayQueue;

use crate::core::completable::Completable;
use crate::core::emplace;
use crate::core::sync::{Arc, AtomicBool, Ordering};

/// Upper bound on the number of pending prerequisites a single job can
/// hold. Prerequisites observed done are removed as they are seen, so
/// this caps the *outstanding* set, not a lifetime total.
pub const MAX_JOB_PREREQUISITES: usize = 1024;

/// The work carried by a job.
///
/// A plain body runs once and is always terminal. A polled body may
/// refuse to finish by returning `false`, in which case the scheduler
/// holds the job and tries again later. Data jobs and shared-resource
/// jobs are built on the polled form: a refused handle must produce a
/// "retry me" signal without consuming the at-most-once guarantee.
pub(crate) enum JobBody {
    Run(Option<Box<dyn FnOnce() + Send>>),
    Poll(Box<dyn FnMut() -> bool + Send>),
}

/// A unit of work plus the prerequisites gating it and a monotonic done
/// flag.
///
/// Jobs are only created by the pool's enqueue operations and are always
/// handled through `Arc<Job>`: the caller keeps one reference, the
/// scheduler keeps one while the job is queued or held, and every
/// dependent naming this job as a prerequisite keeps one until it
/// observes the job done.
pub struct Job {
    body: UnsafeCell<JobBody>,
    done: AtomicBool,
    // Prerequisites are removed when observed done and can be added
    // concurrently while the job is in flight, which is exactly the
    // MPMC queue's contract.
    prerequisites: ArrayQueue<Arc<dyn Completable>>,
}

// The body is only ever touched by `try_run`, and the scheduler hands a
// job to at most one worker at a time.
unsafe impl Send for Job {}
unsafe impl Sync for Job {}

impl Job {
    pub(crate) fn new(body: JobBody) -> Arc<Job> {
        Arc::new(Job {
            body: UnsafeCell::new(body),
            done: AtomicBool::new(false),
            prerequisites: ArrayQueue::new(MAX_JOB_PREREQUISITES),
        })
    }

    /// Prevents execution from starting if it hasn't already. Dependents
    /// are not cancelled: they observe this job as done and become
    /// eligible to run. Idempotent.
    pub fn cancel(&self) {
        self.done.store(true, Ordering::Release);
    }

    /// Adds something this job must wait for before its body may run.
    ///
    /// Prerequisites that are already done are dropped on the spot. Safe
    /// to call from any thread, including from inside another running
    /// job, up until this job's body has run. Cycles between jobs are
    /// not detected; a job that transitively waits on itself is held
    /// forever.
    pub fn add_prerequisite(&self, prerequisite: Arc<dyn Completable>) {
        if prerequisite.is_done() {
            return;
        }
        emplace(&self.prerequisites, prerequisite);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// The scheduler's execution step. Returns true when the job is
    /// terminal and must not be rescheduled.
    ///
    /// Unsafe: may only be called by the worker currently holding this
    /// job's scheduling slot, so that accesses to the body are
    /// exclusive.
    pub(crate) unsafe fn try_run(&self) -> bool {
        if self.done.load(Ordering::Acquire) {
            // Cancelled or already ran.
            return true;
        }

        while let Some(prerequisite) = self.prerequisites.pop() {
            if !prerequisite.is_done() {
                // Unmet prerequisite: put it back and refuse to run.
                // A prerequisite added concurrently with this drain is
                // either seen now or on the next attempt.
                emplace(&self.prerequisites, prerequisite);
                return false;
            }
        }

        let finished = match &mut *self.body.get() {
            JobBody::Run(body) => {
                if let Some(body) = body.take() {
                    if catch_unwind(AssertUnwindSafe(body)).is_err() {
                        tracing::error!("job body panicked; marking the job done");
                    }
                }
                true
            }
            JobBody::Poll(body) => match catch_unwind(AssertUnwindSafe(|| body())) {
                Ok(finished) => finished,
                Err(_) => {
                    tracing::error!("job body panicked; marking the job done");
                    true
                }
            },
        };

        if finished {
            self.done.store(true, Ordering::Release);
        }
        finished
    }
}

impl Completable for Job {
    fn is_done(&self) -> bool {
        self.is_done()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Latch {
        done: AtomicBool,
    }

    impl Latch {
        fn new() -> Arc<Latch> {
            Arc::new(Latch { done: AtomicBool::new(false) })
        }

        fn open(&self) {
            self.done.store(true, Ordering::Release);
        }
    }

    impl Completable for Latch {
        fn is_done(&self) -> bool {
            self.done.load(Ordering::Acquire)
        }
    }

    #[test]
    fn plain_body_runs_at_most_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let job = Job::new(JobBody::Run(Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))));

        assert!(!job.is_done());
        assert!(unsafe { job.try_run() });
        assert!(job.is_done());
        assert!(unsafe { job.try_run() });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prerequisite_gates_execution() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let job = Job::new(JobBody::Run(Some(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        }))));

        let latch = Latch::new();
        job.add_prerequisite(latch.clone());

        assert!(!unsafe { job.try_run() });
        assert!(!unsafe { job.try_run() });
        assert!(!ran.load(Ordering::SeqCst));

        latch.open();
        assert!(unsafe { job.try_run() });
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn done_prerequisites_are_dropped_on_add() {
        let latch = Latch::new();
        latch.open();

        let job = Job::new(JobBody::Run(Some(Box::new(|| {}))));
        job.add_prerequisite(latch);
        assert_eq!(job.prerequisites.len(), 0);
    }

    #[test]
    fn cancel_prevents_execution_and_is_idempotent() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let job = Job::new(JobBody::Run(Some(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
        }))));

        job.cancel();
        job.cancel();
        assert!(job.is_done());
        assert!(unsafe { job.try_run() });
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn polled_body_reholds_until_it_reports_finished() {
        let remaining = Arc::new(AtomicUsize::new(3));
        let countdown = remaining.clone();
        let job = Job::new(JobBody::Poll(Box::new(move || {
            countdown.fetch_sub(1, Ordering::SeqCst) == 1
        })));

        assert!(!unsafe { job.try_run() });
        assert!(!job.is_done());
        assert!(!unsafe { job.try_run() });
        assert!(unsafe { job.try_run() });
        assert!(job.is_done());
    }

    #[test]
    fn panicking_body_is_contained() {
        let job = Job::new(JobBody::Run(Some(Box::new(|| {
            panic!("boom");
        }))));

        assert!(unsafe { job.try_run() });
        assert!(job.is_done());
    }
}
