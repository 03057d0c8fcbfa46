//! The per-call synchronisation object and its typed building blocks.
//!
//! A [`CallHandle`] is shared three ways: the caller waits on it, the
//! dispatcher's queue references it, and the target thread executes it. The
//! handle itself is type-erased; the typed return slot and failure trap are
//! owned by the composed executor closure on one side and by the caller's
//! accessors on the other.

mod event;
mod retval;
mod trap;

pub use trap::Caught;

pub(crate) use event::CompletionEvent;
pub(crate) use retval::RetvalSlot;
pub(crate) use trap::{CaughtKind, DeathHook, FailureTrap};

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Owned guard over a handle's access lock.
///
/// Owning (rather than borrowing) the lock lets the executor keep the guard
/// alive after the queue reference to the handle is gone.
pub(crate) type AccessGuard = ArcMutexGuard<RawMutex, ()>;

/// The composed executor: runs the work, stores the outcome in the typed
/// cells, and reports how the run terminated.
type Executor = Box<dyn FnOnce() -> CaughtKind + Send + 'static>;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("work is already bound to this call handle")]
pub(crate) struct AlreadyBound;

/// A single cross-thread call: the bound work, its completion signal, and
/// the lock that coordinates lifetime between the caller and the executor.
///
/// State machine: new → bound → executing → completed. The executing state
/// is visible only to the thread holding the access lock; everyone else
/// observes either "not yet completed" or "completed".
pub(crate) struct CallHandle {
    /// Signalled once the bound work has terminated, one way or the other.
    completed: CompletionEvent,

    /// Held by the executor for the whole of `execute_callback`, and by a
    /// caller deciding between a terminal state and a timeout dequeue.
    access_lock: Arc<Mutex<()>>,

    /// Present from bind until execution takes it.
    executor: Mutex<Option<Executor>>,

    /// Terminal kind reported by the executor. Meaningless until
    /// `completed` is signalled.
    caught: Mutex<CaughtKind>,

    bound: AtomicBool,
}

impl CallHandle {
    pub(crate) fn new() -> Self {
        Self {
            completed: CompletionEvent::new(),
            access_lock: Arc::new(Mutex::new(())),
            executor: Mutex::new(None),
            caught: Mutex::new(CaughtKind::None),
            bound: AtomicBool::new(false),
        }
    }

    /// Installs the composed executor. A handle is bound at most once; the
    /// flag never rewinds.
    pub(crate) fn bind_work(&self, executor: Executor) -> Result<(), AlreadyBound> {
        if self.bound.swap(true, Ordering::AcqRel) {
            return Err(AlreadyBound);
        }
        *self.executor.lock() = Some(executor);
        Ok(())
    }

    /// Runs the bound work and signals completion.
    ///
    /// Signalling is unconditional: waiters are released even when the work
    /// failed. Runs on the executor thread, which holds the access lock for
    /// the duration.
    pub(crate) fn execute_callback(&self) {
        if let Some(executor) = self.executor.lock().take() {
            let kind = executor();
            *self.caught.lock() = kind;
        }
        self.completed.signal();
    }

    /// Returns true iff the call completes within `timeout` (`None` waits
    /// forever). Pure observer.
    pub(crate) fn wait_for_completion(&self, timeout: Option<Duration>) -> bool {
        self.completed.wait(timeout)
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed.is_signalled()
    }

    /// After completion: whether the work failed rather than produced a
    /// value.
    pub(crate) fn caught_failure(&self) -> bool {
        !matches!(*self.caught.lock(), CaughtKind::None)
    }

    pub(crate) fn caught_kind(&self) -> CaughtKind {
        *self.caught.lock()
    }

    /// The lock coordinating handle lifetime. Executors try-lock it and
    /// skip on contention; callers lock it blockingly after their wait.
    pub(crate) fn access_lock(&self) -> &Arc<Mutex<()>> {
        &self.access_lock
    }
}
