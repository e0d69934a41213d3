//! Parallel iteration over an index range.
//!
//! `for_each` does not try to be clever about granularity: the range is
//! split into one contiguous chunk per worker up front and each chunk
//! becomes an ordinary job, so chunks participate in work stealing and
//! prerequisites like any other job.

use std::ops::Range;

use crate::core::completable::Completable;
use crate::core::job::{Job, JobBody};
use crate::core::sync::Arc;
use crate::core::thread_pool::ThreadPoolRef;

/// Splits `range` into at most `max_chunks` contiguous chunks.
///
/// Leftover elements are handed one apiece to the leading chunks. When
/// there are more chunks than elements this degenerates to one chunk per
/// element; empty chunks are never produced.
pub(crate) fn split_range(range: Range<usize>, max_chunks: usize) -> Vec<Range<usize>> {
    let len = range.len();
    if len == 0 {
        return Vec::new();
    }

    if max_chunks >= len {
        return range.map(|i| i..i + 1).collect();
    }

    let chunk_size = len / max_chunks;
    let chunk_extra = len % max_chunks;

    let mut chunks = Vec::with_capacity(max_chunks);
    let mut start = range.start;
    for i in 0..max_chunks {
        let size = chunk_size + usize::from(i < chunk_extra);
        chunks.push(start..start + size);
        start += size;
    }

    chunks
}

pub(crate) fn for_each_jobs<F>(
    pool: &ThreadPoolRef,
    range: Range<usize>,
    prerequisite: Option<Arc<dyn Completable>>,
    body: F,
) -> Vec<Arc<Job>>
where
    F: Fn(usize) + Send + Sync + 'static,
{
    let body = Arc::new(body);
    let chunks = split_range(range, pool.worker_count() as usize);

    let mut jobs = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let body = Arc::clone(&body);
        let job = Job::new(JobBody::Run(Some(Box::new(move || {
            for index in chunk {
                body(index);
            }
        }))));

        if let Some(prerequisite) = &prerequisite {
            job.add_prerequisite(Arc::clone(prerequisite));
        }

        pool.schedule(Arc::clone(&job));
        jobs.push(job);
    }

    jobs
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::input::InputCell;
    use crate::ThreadPool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn split_range_distributes_leftovers_to_leading_chunks() {
        assert_eq!(split_range(0..10, 4), vec![0..3, 3..6, 6..8, 8..10]);
        assert_eq!(split_range(0..8, 4), vec![0..2, 2..4, 4..6, 6..8]);
        assert_eq!(split_range(5..8, 2), vec![5..7, 7..8]);
    }

    #[test]
    fn split_range_never_produces_empty_chunks() {
        assert_eq!(split_range(0..3, 8), vec![0..1, 1..2, 2..3]);
        assert_eq!(split_range(0..1, 1), vec![0..1]);
        assert!(split_range(4..4, 3).is_empty());

        for len in 1..40 {
            for chunks in 1..10 {
                let split = split_range(0..len, chunks);
                assert!(split.iter().all(|c| !c.is_empty()));
                assert_eq!(split.iter().map(|c| c.len()).sum::<usize>(), len);
                assert_eq!(split.first().unwrap().start, 0);
                assert_eq!(split.last().unwrap().end, len);
            }
        }
    }

    #[test]
    fn for_each_touches_every_element_once() {
        let pool = ThreadPool::builder().with_worker_threads(4).build();

        let elements: Arc<Vec<AtomicUsize>> =
            Arc::new((0..500).map(|_| AtomicUsize::new(0)).collect());

        let slots = Arc::clone(&elements);
        let jobs = pool.for_each(0..500, move |i| {
            slots[i].fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(jobs.len(), 4);

        let deadline = Instant::now() + Duration::from_secs(10);
        for job in &jobs {
            while !job.is_done() {
                assert!(Instant::now() < deadline, "timed out waiting for for_each");
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        assert!(elements.iter().all(|e| e.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn for_each_after_waits_for_the_prerequisite() {
        let pool = ThreadPool::builder().with_worker_threads(2).build();

        let gate: Arc<InputCell<()>> = Arc::new(InputCell::default());
        let counter = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&counter);
        let jobs = pool.for_each_after(0..100, gate.clone(), move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(jobs.iter().all(|job| !job.is_done()));

        gate.submit(());

        let deadline = Instant::now() + Duration::from_secs(10);
        for job in &jobs {
            while !job.is_done() {
                assert!(Instant::now() < deadline, "timed out waiting for for_each");
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }
}
