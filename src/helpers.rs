//! Builders for the specialized job bodies.
//!
//! Data jobs and shared-resource jobs are both expressed as polled
//! bodies: each poll tries to obtain the handles the user body needs and
//! reports non-terminal when any is refused, so the scheduler holds and
//! retries the job. The user body itself still runs at most once.

use crate::core::job::JobBody;
use crate::core::sync::Arc;
use crate::input::InputCell;
use crate::resource::ProviderSet;

/// A body that waits for `cell` to be submitted, then runs `body` over
/// the stored value.
pub(crate) fn data_job_body<T, F>(cell: Arc<InputCell<T>>, body: F) -> JobBody
where
    T: Send + Sync + 'static,
    F: FnOnce(&T) + Send + 'static,
{
    let mut body = Some(body);
    JobBody::Poll(Box::new(move || {
        let Some(guard) = InputCell::create_read_handle(&cell) else {
            return false;
        };
        if let Some(body) = body.take() {
            body(&guard);
        }
        true
    }))
}

/// A body that runs `body` once handles from every provider in the set
/// can be held simultaneously.
pub(crate) fn shared_resource_job_body<P, F>(providers: P, body: F) -> JobBody
where
    P: ProviderSet,
    F: FnOnce(P::Guards) + Send + 'static,
{
    let mut body = Some(body);
    JobBody::Poll(Box::new(move || {
        let Some(guards) = providers.acquire() else {
            return false;
        };
        if let Some(body) = body.take() {
            body(guards);
        }
        true
    }))
}
