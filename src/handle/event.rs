use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A manual-reset completion signal.
///
/// Starts unsignalled. [`signal`] is sticky: once raised the event never
/// reverts, and every past or future waiter observes it. A `timeout` of
/// `None` waits forever.
///
/// [`signal`]: CompletionEvent::signal
pub(crate) struct CompletionEvent {
    signalled: Mutex<bool>,
    cond: Condvar,
}

impl CompletionEvent {
    pub(crate) fn new() -> Self {
        Self {
            signalled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn signal(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.cond.notify_all();
    }

    /// Returns true iff the event is signalled within `timeout`.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut signalled = self.signalled.lock();

        // A timeout too large to express as a deadline waits forever.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        match deadline {
            None => {
                while !*signalled {
                    self.cond.wait(&mut signalled);
                }
                true
            }
            Some(deadline) => {
                while !*signalled {
                    if self.cond.wait_until(&mut signalled, deadline).timed_out() {
                        return *signalled;
                    }
                }
                true
            }
        }
    }

    pub(crate) fn is_signalled(&self) -> bool {
        *self.signalled.lock()
    }
}
