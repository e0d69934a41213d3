//! A task-graph work-stealing thread pool.
//!
//! Jobs are plain closures with dynamically declared prerequisites:
//! anything satisfying the [`Completable`] contract (another job, an
//! [`InputCell`] waiting on data from outside the pool, or a user type)
//! can gate a job's execution, with no central dependency graph.
//!
//! What this crate cares about:
//! - Submitting work from anywhere: job bodies reach their own pool
//!   through [`get_execution_context`] and enqueue children without the
//!   pool being threaded through application code.
//! - Never blocking inside the scheduler. A job whose prerequisite is
//!   unmet or whose resource handle is refused reports "hold me" and is
//!   retried after its worker makes progress elsewhere; the same retry
//!   path serves both protocols.
//! - Mediating shared state without locks: [`SharedResource`] issues
//!   multi-reader / single-writer handles that either succeed or refuse
//!   on the spot.
//! - Letting external threads lend a hand via
//!   [`attach_as_worker`](ThreadPoolRef::attach_as_worker) instead of
//!   resizing the pool.
//!
//! ```
//! use spindle::ThreadPool;
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! let pool = ThreadPool::builder().with_worker_threads(4).build();
//!
//! let counter = Arc::new(AtomicU32::new(0));
//! let tally = Arc::clone(&counter);
//! let first = pool.enqueue_job(move || {
//!     tally.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! let tally = Arc::clone(&counter);
//! let second = pool.enqueue_job_after(
//!     move || {
//!         assert_eq!(tally.load(Ordering::SeqCst), 1);
//!     },
//!     first,
//! );
//!
//! while !second.is_done() {
//!     std::thread::yield_now();
//! }
//! ```

mod core;
mod for_each;
mod helpers;
mod input;
mod resource;

pub use crate::core::completable::Completable;
pub use crate::core::context::{get_execution_context, ExecutionContext};
pub use crate::core::job::{Job, MAX_JOB_PREREQUISITES};
pub use crate::core::thread_pool::{
    AttachError, ThreadPool, ThreadPoolBuilder, ThreadPoolId, ThreadPoolRef,
};
pub use crate::core::{WorkerHook, UNASSIGNED_QUEUE_CAPACITY};
pub use crate::core::sync;
pub use crate::input::{CellGuard, InputCell};
pub use crate::resource::{
    CellReadProvider, Provider, ProviderSet, ReadGuard, ReadProvider, SharedResource, WriteGuard,
    WriteProvider,
};

pub use crossbeam_utils::CachePadded;
