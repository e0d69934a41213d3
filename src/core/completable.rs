/// Anything a job can wait on.
///
/// The contract is a single monotonic observation: once `is_done` has
/// returned `true` for an object, it must never return `false` again.
/// A completing object must publish its side effects with release
/// semantics before the flip so that a dependent observing `true` (with
/// acquire semantics) also observes everything the object wrote.
///
/// `Job` and `InputCell` implement this; user code can implement it for
/// its own one-way latches and feed them to
/// [`Job::add_prerequisite`](crate::Job::add_prerequisite).
pub trait Completable: Send + Sync {
    fn is_done(&self) -> bool;
}
