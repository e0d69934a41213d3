//! One-shot data cells.
//!
//! An [`InputCell`] hands a value produced outside the pool to the job
//! waiting on it. The first submission wins; everything after it is
//! silently dropped. Two flags separate the race for write ownership
//! from the visibility of the written value, so a reader can never
//! observe a partially written `T`: `write_started` is claimed before
//! the store and `write_finished` published (release) after it.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::Arc;

use crate::core::completable::Completable;
use crate::core::sync::{AtomicBool, Ordering};
use crate::resource::CellReadProvider;

pub struct InputCell<T> {
    data: UnsafeCell<T>,
    write_started: AtomicBool,
    write_finished: AtomicBool,
}

unsafe impl<T: Send> Send for InputCell<T> {}
unsafe impl<T: Send + Sync> Sync for InputCell<T> {}

impl<T> InputCell<T> {
    /// Creates a cell holding a placeholder value. The placeholder is
    /// only reachable through a `submit_with` mutator; `read` yields the
    /// value once a submission has fully landed.
    pub fn new(initial: T) -> InputCell<T> {
        InputCell {
            data: UnsafeCell::new(initial),
            write_started: AtomicBool::new(false),
            write_finished: AtomicBool::new(false),
        }
    }

    /// Stores `value` if no submission has happened yet. A losing
    /// submission is dropped; the first write wins.
    pub fn submit(&self, value: T) {
        self.submit_with(move |slot| *slot = value);
    }

    /// Like `submit`, but builds the value in place from the
    /// placeholder.
    pub fn submit_with(&self, mutator: impl FnOnce(&mut T)) {
        if self
            .write_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // We won the race; no other mutation of the value can ever
        // start, and nothing reads it before write_finished is set.
        unsafe { mutator(&mut *self.data.get()) };
        self.write_finished.store(true, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.write_finished.load(Ordering::Acquire)
    }

    /// The submitted value, once one has fully landed.
    pub fn read(&self) -> Option<&T> {
        if self.is_done() {
            Some(unsafe { &*self.data.get() })
        } else {
            None
        }
    }

    /// Counterpart of the shared-resource read handle. The cell is
    /// append-only so the guard carries no reader accounting, only a
    /// liveness hold on the cell.
    pub fn create_read_handle(this: &Arc<Self>) -> Option<CellGuard<T>> {
        if this.is_done() {
            Some(CellGuard { cell: Arc::clone(this) })
        } else {
            None
        }
    }

    pub fn create_read_provider(this: &Arc<Self>) -> CellReadProvider<T> {
        CellReadProvider::new(Arc::clone(this))
    }
}

impl<T: Default> Default for InputCell<T> {
    fn default() -> Self {
        InputCell::new(T::default())
    }
}

impl<T: Send + Sync> Completable for InputCell<T> {
    fn is_done(&self) -> bool {
        self.is_done()
    }
}

/// Read access to a submitted value.
pub struct CellGuard<T> {
    cell: Arc<InputCell<T>>,
}

impl<T> Deref for CellGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // Only constructed once write_finished is set.
        unsafe { &*self.cell.data.get() }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;

    #[test]
    fn first_submission_wins() {
        let cell = InputCell::new(0u32);
        assert!(!cell.is_done());
        assert!(cell.read().is_none());

        cell.submit(5);
        assert!(cell.is_done());
        assert_eq!(cell.read(), Some(&5));

        cell.submit(9);
        cell.submit_with(|slot| *slot = 11);
        assert_eq!(cell.read(), Some(&5));
    }

    #[test]
    fn submit_with_builds_in_place() {
        let cell = InputCell::new(vec![1, 2]);
        cell.submit_with(|v| v.push(3));
        assert_eq!(cell.read(), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn read_handle_tracks_completion() {
        let cell = Arc::new(InputCell::new(String::new()));
        assert!(InputCell::create_read_handle(&cell).is_none());

        cell.submit("ready".to_string());
        let guard = InputCell::create_read_handle(&cell).unwrap();
        assert_eq!(&*guard, "ready");
    }

    #[test]
    fn completable_view_matches_the_flags() {
        let cell = InputCell::new(0i32);
        assert!(!Completable::is_done(&cell));
        cell.submit(1);
        assert!(Completable::is_done(&cell));
    }
}

#[cfg(all(test, loom))]
mod loom_tests {
    use super::InputCell;
    use loom::sync::Arc;

    // Two racing submitters: exactly one wins, and any observed value is
    // a fully written one.
    #[test]
    fn racing_submissions_yield_one_winner() {
        loom::model(|| {
            let cell = Arc::new(InputCell::new(0u32));

            let other = Arc::clone(&cell);
            let t = loom::thread::spawn(move || {
                other.submit(1);
            });

            cell.submit(2);
            t.join().unwrap();

            let value = *cell.read().unwrap();
            assert!(value == 1 || value == 2);
        });
    }
}
