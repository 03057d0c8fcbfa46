//! The bundled reference transport: one dedicated pickup-servicing thread
//! per target, driven by an unbounded channel.

use super::id::PumpId;
use super::{Pickup, PickupError, PickupTransport};
use crossbeam_channel::{Receiver, Sender};
use dashmap::DashMap;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::trace;

enum PumpMessage {
    /// Run a pickup armed by the dispatcher.
    Pickup(Pickup),

    /// Occupy the pump without reaching a pickup point.
    Stall(Duration),

    /// Leave the pump loop.
    Shutdown,
}

/// A registry-backed transport whose targets are [`PumpThread`]s.
///
/// `schedule_pickup` posts the pickup onto the target's channel; the pump
/// thread runs it at its next loop iteration. Nothing ever runs
/// synchronously from within `schedule_pickup`.
pub struct PumpTransport {
    pumps: Arc<DashMap<PumpId, Sender<PumpMessage>>>,
}

impl PumpTransport {
    pub fn new() -> Self {
        Self {
            pumps: Arc::new(DashMap::new()),
        }
    }
}

impl Default for PumpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PickupTransport for PumpTransport {
    type ThreadId = PumpId;

    fn schedule_pickup(&self, target: PumpId, pickup: Pickup) -> Result<(), PickupError> {
        let Some(sender) = self.pumps.get(&target) else {
            return Err(PickupError::UnknownTarget);
        };

        sender
            .send(PumpMessage::Pickup(pickup))
            .map_err(|_| PickupError::TargetClosed)
    }
}

/// An owned worker thread servicing pickups for its [`PumpId`].
///
/// The thread registers itself with the transport on spawn, loops on its
/// channel until the handle is dropped, and is joined on drop.
pub struct PumpThread {
    id: PumpId,
    sender: Sender<PumpMessage>,
    pumps: Arc<DashMap<PumpId, Sender<PumpMessage>>>,
    join: Option<thread::JoinHandle<()>>,
}

impl PumpThread {
    pub fn spawn(transport: &PumpTransport) -> io::Result<Self> {
        let id = PumpId::next();
        let (sender, receiver) = crossbeam_channel::unbounded();

        transport.pumps.insert(id, sender.clone());

        let join = thread::Builder::new()
            .name(format!("crosscall-pump-{id}"))
            .spawn(move || pump_loop(id, receiver))
            .inspect_err(|_| {
                transport.pumps.remove(&id);
            })?;

        Ok(Self {
            id,
            sender,
            pumps: Arc::clone(&transport.pumps),
            join: Some(join),
        })
    }

    /// The id to address calls to.
    pub fn id(&self) -> PumpId {
        self.id
    }

    /// Occupies the pump for `duration` without reaching a pickup point.
    ///
    /// Pickups armed in the meantime run only once the stall ends. Queued
    /// behind whatever the pump is currently doing.
    pub fn stall(&self, duration: Duration) {
        let _ = self.sender.send(PumpMessage::Stall(duration));
    }
}

impl Drop for PumpThread {
    fn drop(&mut self) {
        // Deregister first so no new pickups are accepted for this id.
        self.pumps.remove(&self.id);
        let _ = self.sender.send(PumpMessage::Shutdown);

        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn pump_loop(id: PumpId, receiver: Receiver<PumpMessage>) {
    trace!(pump = %id, "pump thread running");

    while let Ok(message) = receiver.recv() {
        match message {
            PumpMessage::Pickup(pickup) => pickup.run(),
            PumpMessage::Stall(duration) => thread::sleep(duration),
            PumpMessage::Shutdown => break,
        }
    }

    trace!(pump = %id, "pump thread exiting");
}
