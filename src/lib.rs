//! Cross-thread synchronous and asynchronous call dispatch.
//!
//! A caller on one thread asks that a nullary computation run on a named
//! target thread, waits for the result (optionally with a timeout) or polls
//! a future, and receives either the return value or the failure the
//! computation produced, as if the call had been local.
//!
//! The target thread executes queued calls at its *pickup points*, driven
//! by a pluggable [`PickupTransport`]. The bundled [`PumpTransport`] runs a
//! dedicated channel-driven thread per target; custom transports can hook a
//! GUI message loop or any other runloop instead.
//!
//! # Example
//!
//! ```
//! use crosscall::{CallScheduler, CallStatus, PumpThread, PumpTransport};
//! use std::time::Duration;
//!
//! let scheduler = CallScheduler::new(PumpTransport::new());
//! let pump = PumpThread::spawn(scheduler.transport()).unwrap();
//!
//! // Synchronous: block until the target thread has run the closure.
//! let sum = scheduler
//!     .sync_call(pump.id(), || 40 + 2, Some(Duration::from_secs(1)))
//!     .unwrap();
//! assert_eq!(sum, 42);
//!
//! // Asynchronous: poll a future instead.
//! let future = scheduler.async_call(pump.id(), || "done").unwrap();
//! assert_eq!(future.wait(None), CallStatus::Complete);
//! assert_eq!(future.get_value().unwrap(), "done");
//! ```
//!
//! Expected failures declared through [`CallScheduler::try_sync_call`] /
//! [`CallScheduler::try_async_call`] are transported back to the caller
//! with their payload intact; anything else (a panic on the target thread)
//! surfaces as [`CallError::Unexpected`].

pub mod future;

pub mod scheduler;

pub mod transport;

mod handle;

pub use future::{CallFuture, CallStatus, FutureError};
pub use handle::Caught;
pub use scheduler::{CallError, CallScheduler};
pub use transport::pump::{PumpThread, PumpTransport};
pub use transport::{Pickup, PickupError, PickupTransport, PumpId};

#[cfg(test)]
pub mod test_utils;
