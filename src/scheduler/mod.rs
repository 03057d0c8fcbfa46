//! The dispatcher: per-target queues of pending calls, the pickup-arming
//! protocol, and the synchronous / asynchronous entry points.

mod errors;

pub use errors::CallError;

#[cfg(test)]
mod tests;

use crate::future::CallFuture;
use crate::handle::{AccessGuard, CallHandle, DeathHook, FailureTrap, RetvalSlot};
use crate::transport::pump::PumpTransport;
use crate::transport::{Pickup, PickupTransport};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, trace};

/// Dispatches nullary computations onto named target threads.
///
/// A `CallScheduler` is a cheap handle over shared state; clone it freely.
/// One instance per process is the recommended setup, but nothing requires
/// static lifetime.
///
/// # Example
///
/// ```
/// use crosscall::{CallScheduler, PumpThread, PumpTransport};
///
/// let scheduler = CallScheduler::new(PumpTransport::new());
/// let pump = PumpThread::spawn(scheduler.transport()).unwrap();
///
/// let value = scheduler.sync_call(pump.id(), || 2 + 2, None).unwrap();
/// assert_eq!(value, 4);
/// ```
pub struct CallScheduler<P: PickupTransport> {
    shared: Arc<Shared<P>>,
}

impl<P: PickupTransport> Clone for CallScheduler<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<P: PickupTransport> {
    transport: P,

    /// All pending calls, keyed by target thread. A key is present iff a
    /// pickup has been armed for that thread since its queue last became
    /// empty; an enqueue onto an absent key must arm anew.
    queues: Mutex<HashMap<P::ThreadId, VecDeque<Arc<CallHandle>>>>,
}

impl CallScheduler<PumpTransport> {
    /// The process-wide dispatcher over the bundled pump transport.
    ///
    /// Lazily initialised; a convenience for programs that want exactly one
    /// dispatcher. Transports other than [`PumpTransport`] go through
    /// [`CallScheduler::new`].
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<CallScheduler<PumpTransport>> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::new(PumpTransport::new()))
    }
}

impl<P: PickupTransport> CallScheduler<P> {
    pub fn new(transport: P) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                queues: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The transport this dispatcher arms pickups through.
    pub fn transport(&self) -> &P {
        &self.shared.transport
    }

    /// Runs `work` on the `target` thread and waits for its value.
    ///
    /// No failure is expected from the work: if it panics on the target
    /// thread, the caller sees [`CallError::Unexpected`] and the payload is
    /// not transported. A `timeout` of `None` waits forever.
    ///
    /// A timeout never cancels work that has already begun; if the deadline
    /// and the execution race, the caller still receives the outcome of the
    /// execution rather than [`CallError::Timeout`].
    pub fn sync_call<T, F>(
        &self,
        target: P::ThreadId,
        work: F,
        timeout: Option<Duration>,
    ) -> Result<T, CallError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.try_sync_call(target, move || Ok::<_, Infallible>(work()), timeout)
    }

    /// Runs `work` on the `target` thread, transporting expected failures
    /// back typed.
    ///
    /// An `Err(e)` produced by the work is captured on the target thread
    /// and rethrown here as [`CallError::Failed`] with the payload intact;
    /// a panic becomes [`CallError::Unexpected`].
    pub fn try_sync_call<T, E, F>(
        &self,
        target: P::ThreadId,
        work: F,
        timeout: Option<Duration>,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let handle = Arc::new(CallHandle::new());
        let retval = Arc::new(RetvalSlot::new());
        let trap = Arc::new(FailureTrap::new());
        bind(&handle, &retval, &trap, work);

        self.shared
            .enqueue(target, Arc::clone(&handle))
            .map_err(CallError::SchedulingFailed)?;

        handle.wait_for_completion(timeout);

        // The executor may be mid-call right now; wait for it to let go of
        // the handle before deciding between a terminal state and a timeout.
        let _guard = handle.access_lock().lock_arc();

        if handle.is_completed() {
            if handle.caught_failure() {
                Err(rethrow(&trap, &handle))
            } else {
                let value = retval
                    .take()
                    .expect("a completed call without a failure stored a value");
                Ok(value)
            }
        } else {
            self.shared.dequeue(target, &handle);
            debug!(thread = ?target, "call timed out before pickup");
            Err(CallError::Timeout)
        }
    }

    /// Schedules `work` on the `target` thread without waiting.
    ///
    /// See [`sync_call`] for the failure model. The returned future aborts
    /// the call when dropped; an in-flight execution always runs to
    /// completion.
    ///
    /// [`sync_call`]: CallScheduler::sync_call
    pub fn async_call<T, F>(
        &self,
        target: P::ThreadId,
        work: F,
    ) -> Result<CallFuture<T>, CallError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.try_async_call(target, move || Ok::<_, Infallible>(work()))
    }

    /// Schedules `work` on the `target` thread without waiting,
    /// transporting expected failures back typed through the future.
    pub fn try_async_call<T, E, F>(
        &self,
        target: P::ThreadId,
        work: F,
    ) -> Result<CallFuture<T, E>, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let handle = Arc::new(CallHandle::new());
        let retval = Arc::new(RetvalSlot::new());
        let trap = Arc::new(FailureTrap::new());

        // Assemble the caller-facing future before the handle becomes
        // reachable from the queue.
        let future = CallFuture::new(
            Arc::clone(&handle),
            Arc::clone(&retval),
            Arc::clone(&trap),
            {
                let shared = Arc::downgrade(&self.shared);
                let handle = Arc::clone(&handle);
                Box::new(move || {
                    if let Some(shared) = shared.upgrade() {
                        shared.dequeue(target, &handle);
                    }
                })
            },
        );

        bind(&handle, &retval, &trap, work);
        self.shared
            .enqueue(target, handle)
            .map_err(CallError::SchedulingFailed)?;

        Ok(future)
    }
}

/// Composes the typed executor and binds it onto the handle: run the work,
/// store a value into the slot or a failure into the trap, report the kind.
fn bind<T, E, F>(
    handle: &Arc<CallHandle>,
    retval: &Arc<RetvalSlot<T>>,
    trap: &Arc<FailureTrap<E>>,
    work: F,
) where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let retval = Arc::clone(retval);
    let trap = Arc::clone(trap);

    handle
        .bind_work(Box::new(move || {
            trap.execute(|| work().map(|value| retval.store(value)))
        }))
        .expect("a freshly created handle is bound exactly once");
}

/// Takes the captured failure out of `trap`, transferring ownership of the
/// handle to the rethrown payload: the handle stays alive until the caller
/// releases the failure.
fn rethrow<E>(trap: &FailureTrap<E>, handle: &Arc<CallHandle>) -> CallError<E> {
    let keepalive = Arc::clone(handle);
    let hook: DeathHook = Box::new(move || drop(keepalive));

    match trap.rethrow(hook) {
        Some(caught) => CallError::Failed(caught),
        None => CallError::Unexpected,
    }
}

impl<P: PickupTransport> Shared<P> {
    /// Appends `handle` to the target's queue, arming a pickup iff the
    /// queue transitioned from empty to non-empty.
    ///
    /// If the transport refuses, the insert is undone in the same critical
    /// section so no dead handle lingers on the queue.
    fn enqueue(
        self: &Arc<Self>,
        target: P::ThreadId,
        handle: Arc<CallHandle>,
    ) -> Result<(), crate::transport::PickupError> {
        let mut queues = self.queues.lock();

        let must_arm = !queues.contains_key(&target);
        queues.entry(target).or_default().push_back(handle);

        if must_arm {
            let pickup = Pickup::new({
                let shared = Arc::downgrade(self);
                move || {
                    if let Some(shared) = shared.upgrade() {
                        shared.execute_scheduled_calls(target);
                    }
                }
            });

            if let Err(err) = self.transport.schedule_pickup(target, pickup) {
                // The entry was created by us and the lock has been held
                // throughout, so it contains exactly the handle inserted
                // above.
                queues.remove(&target);
                debug!(thread = ?target, %err, "failed to arm pickup");
                return Err(err);
            }

            trace!(thread = ?target, "pickup armed");
        }

        trace!(thread = ?target, "call enqueued");
        Ok(())
    }

    /// Removes `handle` from the target's queue.
    ///
    /// Silently a no-op when either lookup misses: the handle may already
    /// have been taken by a concurrent pickup, which is a legal race.
    fn dequeue(&self, target: P::ThreadId, handle: &Arc<CallHandle>) {
        let mut queues = self.queues.lock();

        let Some(queue) = queues.get_mut(&target) else {
            return;
        };
        let Some(position) = queue.iter().position(|queued| Arc::ptr_eq(queued, handle)) else {
            return;
        };

        queue.remove(position);
        if queue.is_empty() {
            queues.remove(&target);
        }

        trace!(thread = ?target, "call dequeued");
    }

    /// Serves the next handle whose access lock can be taken without
    /// blocking, together with the held guard.
    ///
    /// A handle whose lock is contended belongs to a caller mid-dequeue and
    /// is about to vanish; it is skipped, never waited on. This discipline
    /// is what keeps the executor from deadlocking against a caller that
    /// holds the handle lock while reaching for the queue lock.
    fn get_next_from_queue(&self, target: P::ThreadId) -> Option<(Arc<CallHandle>, AccessGuard)> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(&target)?;

        for position in 0..queue.len() {
            let Some(guard) = queue[position].access_lock().try_lock_arc() else {
                continue;
            };

            let handle = queue.remove(position).expect("position is within bounds");
            if queue.is_empty() {
                queues.remove(&target);
            }

            return Some((handle, guard));
        }

        None
    }

    /// Drains the target's queue. Runs on the target thread, invoked by the
    /// armed pickup.
    fn execute_scheduled_calls(&self, target: P::ThreadId) {
        trace!(thread = ?target, "draining scheduled calls");

        while let Some((handle, guard)) = self.get_next_from_queue(target) {
            handle.execute_callback();

            // Once the guard is released the caller may drop the handle at
            // any time.
            drop(guard);
            drop(handle);
        }
    }
}
