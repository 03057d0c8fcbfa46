//! How a target thread learns that it has pending cross-thread calls.
//!
//! The dispatcher is agnostic to the wakeup mechanics: it hands the
//! transport an opaque [`Pickup`] and expects it to run on the target
//! thread at that thread's next pickup point, whether that is a runloop
//! iteration or a message-pump tick. The bundled [`PumpTransport`] services
//! pickups from a dedicated channel-driven thread per target.
//!
//! [`PumpTransport`]: pump::PumpTransport

pub mod pump;

mod id;

pub use id::PumpId;

use std::fmt;
use std::hash::Hash;

/// A unit of work the transport must run on a target thread at its next
/// pickup point.
pub struct Pickup(Box<dyn FnOnce() + Send + 'static>);

impl Pickup {
    pub(crate) fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Runs the pickup, consuming it. A pickup runs at most once.
    pub fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Pickup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pickup")
    }
}

/// Errors a transport may report when asked to arm a pickup.
#[derive(thiserror::Error, Debug)]
pub enum PickupError {
    #[error("no pickup target is registered for the requested thread")]
    UnknownTarget,

    #[error("the pickup target is shutting down")]
    TargetClosed,

    /// A catch-all for transport-specific failures.
    #[error("transport error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Delivers pickups to target threads.
///
/// # Contract
///
/// `schedule_pickup` arranges for `pickup` to run on `target` the next time
/// that thread reaches a pickup point. It may fail synchronously, but it
/// must not *run* the pickup from within the call: the dispatcher invokes it
/// while holding its queue lock, and the pickup re-enters that lock.
///
/// A transport is not required to support cancelling an armed pickup; the
/// dispatcher tolerates pickups that find nothing to do.
pub trait PickupTransport: Send + Sync + 'static {
    /// Identifies a pickup target. Opaque to the dispatcher, which only
    /// compares and hashes it.
    type ThreadId: Copy + Eq + Hash + Send + Sync + fmt::Debug + 'static;

    fn schedule_pickup(&self, target: Self::ThreadId, pickup: Pickup) -> Result<(), PickupError>;
}
