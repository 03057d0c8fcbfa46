//! The asynchronous caller's handle over a scheduled call.

mod errors;

pub use errors::FutureError;

use crate::handle::{CallHandle, Caught, CaughtKind, DeathHook, FailureTrap, RetvalSlot};
use crate::scheduler::CallError;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Status of an asynchronous cross-thread call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// An error condition. Not produced by the bundled dispatcher; reserved
    /// for wrappers that need to report a failed status poll.
    Error,

    /// The computation has not yet completed.
    Pending,

    /// The computation has completed.
    Complete,

    /// The computation was removed from its queue before it began.
    Aborted,
}

/// Removes the underlying handle from its queue; stored type-erased so the
/// future is not generic over the transport.
type DequeueFn = Box<dyn Fn() + Send + Sync + 'static>;

/// The handle returned by an asynchronous call.
///
/// The future shares ownership of the underlying call handle with the
/// dispatcher's queue until execution or cancellation completes. Dropping
/// it aborts a still-queued call; work that has begun executing always runs
/// to completion.
///
/// The value type must be owned outright (`Send + 'static`), which is what
/// rules borrowed return values out:
///
/// ```compile_fail
/// use crosscall::{CallScheduler, PumpThread, PumpTransport};
///
/// let scheduler = CallScheduler::new(PumpTransport::new());
/// let pump = PumpThread::spawn(scheduler.transport()).unwrap();
///
/// let local = String::from("not yours to share");
/// let borrowed = &local;
/// let future = scheduler.async_call(pump.id(), move || borrowed).unwrap();
/// ```
pub struct CallFuture<T, E = Infallible> {
    handle: Arc<CallHandle>,
    retval: Arc<RetvalSlot<T>>,
    trap: Arc<FailureTrap<E>>,
    dequeue: DequeueFn,
}

impl<T, E> CallFuture<T, E> {
    pub(crate) fn new(
        handle: Arc<CallHandle>,
        retval: Arc<RetvalSlot<T>>,
        trap: Arc<FailureTrap<E>>,
        dequeue: DequeueFn,
    ) -> Self {
        Self {
            handle,
            retval,
            trap,
            dequeue,
        }
    }

    /// Waits for the computation for up to `timeout` (`None` waits
    /// forever). Never fails.
    pub fn wait(&self, timeout: Option<Duration>) -> CallStatus {
        if self.handle.wait_for_completion(timeout) {
            CallStatus::Complete
        } else {
            CallStatus::Pending
        }
    }

    /// Attempts to abort the computation.
    ///
    /// A call that already completed is reported as [`CallStatus::Complete`],
    /// with its captured failure rethrown if it had one. A call that has
    /// begun executing runs to completion first. Only a call still sitting
    /// in its queue is truly removed, reported as [`CallStatus::Aborted`].
    pub fn abort(&self) -> Result<CallStatus, CallError<E>> {
        // Wait out any in-flight execution before deciding.
        let _guard = self.handle.access_lock().lock_arc();

        if self.handle.is_completed() {
            match self.handle.caught_kind() {
                CaughtKind::None => Ok(CallStatus::Complete),
                CaughtKind::Expected => match self.rethrow() {
                    Some(caught) => Err(CallError::Failed(caught)),
                    // Already rethrown by an earlier observer.
                    None => Ok(CallStatus::Complete),
                },
                CaughtKind::Unknown => Err(CallError::Unexpected),
            }
        } else {
            (self.dequeue)();
            Ok(CallStatus::Aborted)
        }
    }

    /// Moves the computed value out.
    ///
    /// Fails with [`FutureError::ValuePending`] unless the computation has
    /// completed; rethrows a captured failure. A second call after the
    /// value was moved out also observes [`FutureError::ValuePending`].
    pub fn get_value(&self) -> Result<T, FutureError<E>> {
        if self.wait(Some(Duration::ZERO)) != CallStatus::Complete {
            return Err(FutureError::ValuePending);
        }

        match self.handle.caught_kind() {
            CaughtKind::None => self.retval.take().ok_or(FutureError::ValuePending),
            CaughtKind::Expected => match self.rethrow() {
                Some(caught) => Err(CallError::Failed(caught).into()),
                None => Err(FutureError::ValuePending),
            },
            CaughtKind::Unknown => Err(CallError::<E>::Unexpected.into()),
        }
    }

    /// Keeps the handle alive for as long as the caller holds the rethrown
    /// payload.
    fn rethrow(&self) -> Option<Caught<E>> {
        let keepalive = Arc::clone(&self.handle);
        let hook: DeathHook = Box::new(move || drop(keepalive));
        self.trap.rethrow(hook)
    }
}

impl<T, E> Drop for CallFuture<T, E> {
    fn drop(&mut self) {
        // A failure raised by the abort must not propagate out of a drop.
        let _ = self.abort();
    }
}
