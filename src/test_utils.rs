#![allow(unused)]

use crate::scheduler::CallScheduler;
use crate::transport::pump::{PumpThread, PumpTransport};
use crate::transport::{Pickup, PickupError, PickupTransport, PumpId};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Opt-in log output for tests: `RUST_LOG=trace cargo test -- --nocapture`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A dispatcher over a fresh pump transport plus one running pump.
pub fn pump_fixture() -> (CallScheduler<PumpTransport>, PumpThread) {
    init_tracing();

    let scheduler = CallScheduler::new(PumpTransport::new());
    let pump = PumpThread::spawn(scheduler.transport()).expect("failed to spawn pump thread");

    (scheduler, pump)
}

/// Wraps a [`PumpTransport`], counting how many pickups get armed.
pub struct CountingTransport {
    inner: PumpTransport,
    armed: Arc<AtomicUsize>,
}

impl CountingTransport {
    pub fn new() -> Self {
        Self {
            inner: PumpTransport::new(),
            armed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &PumpTransport {
        &self.inner
    }

    pub fn armed(&self) -> usize {
        self.armed.load(Ordering::SeqCst)
    }
}

impl PickupTransport for CountingTransport {
    type ThreadId = PumpId;

    fn schedule_pickup(&self, target: PumpId, pickup: Pickup) -> Result<(), PickupError> {
        self.armed.fetch_add(1, Ordering::SeqCst);
        self.inner.schedule_pickup(target, pickup)
    }
}

/// A transport that refuses every pickup.
pub struct RefusingTransport;

impl PickupTransport for RefusingTransport {
    type ThreadId = PumpId;

    fn schedule_pickup(&self, _target: PumpId, _pickup: Pickup) -> Result<(), PickupError> {
        Err(PickupError::UnknownTarget)
    }
}
