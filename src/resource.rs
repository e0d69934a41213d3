//! Non-blocking multi-reader / single-writer arbitration.
//!
//! A [`SharedResource`] never blocks a caller: handle creation either
//! succeeds and returns a guard that releases its hold on drop, or
//! refuses and returns `None`, leaving the resource's state net
//! unchanged by the attempt. The scheduler treats a refusal exactly like
//! an unmet prerequisite: the enclosing job reports non-terminal and is
//! retried after the worker makes progress elsewhere.
//!
//! The check is optimistic. A reader registers itself and then looks for
//! a writer; a writer asserts itself and then looks for readers; each
//! side rolls back when it loses. Under pathological contention both
//! sides can refuse each other, which the retry protocol absorbs.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::core::sync::{AtomicBool, AtomicU32, Ordering};
use crate::input::InputCell;

/// A value of type `T` guarded by reader/writer arbitration.
///
/// Constructed bare and then shared as `Arc<SharedResource<T>>`; the
/// handle and provider constructors are associated functions over the
/// `Arc` so that guards can keep the resource alive on their own.
pub struct SharedResource<T> {
    data: UnsafeCell<T>,
    readers: AtomicU32,
    writer: AtomicBool,
}

unsafe impl<T: Send> Send for SharedResource<T> {}
unsafe impl<T: Send + Sync> Sync for SharedResource<T> {}

impl<T> SharedResource<T> {
    pub fn new(value: T) -> SharedResource<T> {
        SharedResource {
            data: UnsafeCell::new(value),
            readers: AtomicU32::new(0),
            writer: AtomicBool::new(false),
        }
    }

    /// Unsynchronized access to the underlying value. The caller is
    /// responsible for not racing live handles.
    pub fn as_ptr(&self) -> *mut T {
        self.data.get()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    // The arbitration protocol. All operations are SeqCst: mutual
    // exclusion between a reader's increment-then-check-writer and a
    // writer's assert-then-check-readers needs a single total order
    // over the four accesses.

    pub(crate) fn try_acquire_read(&self) -> bool {
        self.readers.fetch_add(1, Ordering::SeqCst);
        if self.writer.load(Ordering::SeqCst) {
            // A writer is active; take back our hold and refuse.
            self.readers.fetch_sub(1, Ordering::SeqCst);
            false
        } else {
            true
        }
    }

    pub(crate) fn release_read(&self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn try_acquire_write(&self) -> bool {
        if self.writer.swap(true, Ordering::SeqCst) {
            // Another writer is active.
            return false;
        }
        if self.readers.load(Ordering::SeqCst) > 0 {
            // At least one active reader; release our hold and refuse.
            self.writer.store(false, Ordering::SeqCst);
            false
        } else {
            true
        }
    }

    pub(crate) fn release_write(&self) {
        self.writer.store(false, Ordering::SeqCst);
    }

    /// Returns a shared-access guard, or `None` while a writer is
    /// active.
    pub fn create_read_handle(this: &Arc<Self>) -> Option<ReadGuard<T>> {
        if this.try_acquire_read() {
            Some(ReadGuard { resource: Arc::clone(this) })
        } else {
            None
        }
    }

    /// Returns an exclusive-access guard, or `None` while any reader or
    /// another writer is active.
    pub fn create_write_handle(this: &Arc<Self>) -> Option<WriteGuard<T>> {
        if this.try_acquire_write() {
            Some(WriteGuard { resource: Arc::clone(this) })
        } else {
            None
        }
    }

    pub fn create_read_provider(this: &Arc<Self>) -> ReadProvider<T> {
        ReadProvider { resource: Arc::clone(this) }
    }

    pub fn create_write_provider(this: &Arc<Self>) -> WriteProvider<T> {
        WriteProvider { resource: Arc::clone(this) }
    }
}

/// Shared access to a resource. Holds exactly one increment of the
/// reader count and gives it back on drop.
pub struct ReadGuard<T> {
    resource: Arc<SharedResource<T>>,
}

impl<T> Deref for ReadGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        // Readers only coexist with other readers.
        unsafe { &*self.resource.data.get() }
    }
}

impl<T> Drop for ReadGuard<T> {
    fn drop(&mut self) {
        self.resource.release_read();
    }
}

/// Exclusive access to a resource. Holds the writer flag and clears it
/// on drop.
pub struct WriteGuard<T> {
    resource: Arc<SharedResource<T>>,
}

impl<T> Deref for WriteGuard<T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.resource.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        // The writer flag guarantees no reader and no other writer.
        unsafe { &mut *self.resource.data.get() }
    }
}

impl<T> Drop for WriteGuard<T> {
    fn drop(&mut self) {
        self.resource.release_write();
    }
}

/// A cloneable handle factory bound to one resource or cell.
///
/// Jobs capture providers rather than guards: a provider is how a job
/// holds the *right to request* access later, each time it is polled.
pub trait Provider: Send + Sync + 'static {
    type Guard;
    fn get(&self) -> Option<Self::Guard>;
}

pub struct ReadProvider<T> {
    resource: Arc<SharedResource<T>>,
}

impl<T> Clone for ReadProvider<T> {
    fn clone(&self) -> Self {
        ReadProvider { resource: Arc::clone(&self.resource) }
    }
}

impl<T: Send + Sync + 'static> Provider for ReadProvider<T> {
    type Guard = ReadGuard<T>;
    fn get(&self) -> Option<ReadGuard<T>> {
        SharedResource::create_read_handle(&self.resource)
    }
}

pub struct WriteProvider<T> {
    resource: Arc<SharedResource<T>>,
}

impl<T> Clone for WriteProvider<T> {
    fn clone(&self) -> Self {
        WriteProvider { resource: Arc::clone(&self.resource) }
    }
}

impl<T: Send + Sync + 'static> Provider for WriteProvider<T> {
    type Guard = WriteGuard<T>;
    fn get(&self) -> Option<WriteGuard<T>> {
        SharedResource::create_write_handle(&self.resource)
    }
}

/// Read access to an input cell, for mixing cells into provider sets.
pub struct CellReadProvider<T> {
    cell: Arc<InputCell<T>>,
}

impl<T> CellReadProvider<T> {
    pub(crate) fn new(cell: Arc<InputCell<T>>) -> Self {
        CellReadProvider { cell }
    }
}

impl<T> Clone for CellReadProvider<T> {
    fn clone(&self) -> Self {
        CellReadProvider { cell: Arc::clone(&self.cell) }
    }
}

impl<T: Send + Sync + 'static> Provider for CellReadProvider<T> {
    type Guard = crate::input::CellGuard<T>;
    fn get(&self) -> Option<Self::Guard> {
        InputCell::create_read_handle(&self.cell)
    }
}

/// One or more providers whose handles a shared-resource job must hold
/// simultaneously. Implemented for tuples of providers; handles are
/// acquired left to right and the ones already obtained are released as
/// soon as one is refused.
pub trait ProviderSet: Send + Sync + 'static {
    type Guards;
    fn acquire(&self) -> Option<Self::Guards>;
}

macro_rules! provider_set_tuple {
    ($($provider:ident)+) => {
        #[allow(non_snake_case)]
        impl<$($provider: Provider),+> ProviderSet for ($($provider,)+) {
            type Guards = ($($provider::Guard,)+);
            fn acquire(&self) -> Option<Self::Guards> {
                let ($($provider,)+) = self;
                Some(($($provider.get()?,)+))
            }
        }
    };
}

provider_set_tuple! { P1 }
provider_set_tuple! { P1 P2 }
provider_set_tuple! { P1 P2 P3 }
provider_set_tuple! { P1 P2 P3 P4 }
provider_set_tuple! { P1 P2 P3 P4 P5 }
provider_set_tuple! { P1 P2 P3 P4 P5 P6 }
provider_set_tuple! { P1 P2 P3 P4 P5 P6 P7 }
provider_set_tuple! { P1 P2 P3 P4 P5 P6 P7 P8 }
