use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

/// How an execution of the bound work terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaughtKind {
    /// The work produced a value.
    None,
    /// The work failed with a payload from the declared expected set.
    Expected,
    /// The work failed outside the expected set; the payload is not kept.
    Unknown,
}

/// Runs when a rethrown failure is finally released by the caller.
pub(crate) type DeathHook = Box<dyn FnOnce() + Send + Sync + 'static>;

/// Captures a failure raised by the work closure on the executor thread so
/// it can be rethrown on the caller's thread with its payload intact.
///
/// The expected-failure set is the error type `E` of the work closure: an
/// `Err(e)` is an expected failure, a panic is an unexpected one.
pub(crate) struct FailureTrap<E> {
    payload: Mutex<Option<E>>,
}

impl<E> FailureTrap<E> {
    pub(crate) fn new() -> Self {
        Self {
            payload: Mutex::new(None),
        }
    }

    /// Runs `inner`, recording how it terminated.
    ///
    /// An `Err` payload is stored for a later [`rethrow`]; a panic is
    /// contained here so nothing unwinds into the executor's drain loop.
    ///
    /// [`rethrow`]: FailureTrap::rethrow
    pub(crate) fn execute(&self, inner: impl FnOnce() -> Result<(), E>) -> CaughtKind {
        match panic::catch_unwind(AssertUnwindSafe(inner)) {
            Ok(Ok(())) => CaughtKind::None,
            Ok(Err(payload)) => {
                *self.payload.lock() = Some(payload);
                CaughtKind::Expected
            }
            Err(panic_payload) => {
                // The payload cannot cross the thread boundary; log what we
                // can of it before it is dropped.
                let message = panic_payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| panic_payload.downcast_ref::<String>().map(String::as_str));
                debug!(message, "scheduled call raised an unexpected failure");
                CaughtKind::Unknown
            }
        }
    }

    /// Takes the captured payload, wrapping it together with `hook`.
    ///
    /// Returns `None` if no expected failure is stored (never captured, or
    /// already rethrown once).
    pub(crate) fn rethrow(&self, hook: DeathHook) -> Option<Caught<E>> {
        self.payload.lock().take().map(|payload| Caught {
            payload: Some(payload),
            hook: Some(hook),
        })
    }
}

/// An expected failure transported back to the calling thread.
///
/// Dereferences to the payload. The wrapper carries a death hook that runs
/// when the `Caught` is dropped; the dispatcher uses it to keep the
/// underlying call handle alive for exactly as long as the caller is
/// observing the failure.
pub struct Caught<E> {
    // Both are `Some` until `into_inner` / drop.
    payload: Option<E>,
    hook: Option<DeathHook>,
}

impl<E> Caught<E> {
    /// Moves the payload out. The death hook still runs.
    pub fn into_inner(mut self) -> E {
        self.payload
            .take()
            .expect("payload is present until into_inner")
    }

    pub fn get(&self) -> &E {
        self.payload
            .as_ref()
            .expect("payload is present until into_inner")
    }
}

impl<E> Deref for Caught<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.get()
    }
}

impl<E: fmt::Debug> fmt::Debug for Caught<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            Some(payload) => f.debug_tuple("Caught").field(payload).finish(),
            None => f.write_str("Caught(<taken>)"),
        }
    }
}

impl<E> Drop for Caught<E> {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }
}
