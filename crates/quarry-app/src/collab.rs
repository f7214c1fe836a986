//! Interfaces the scheduler drives: protocol handling, simulation, rendering,
//! and the one-time resource-load handshake.

use crossbeam_channel::{Receiver, Sender};
use quarry_mesh::MeshStore;
use quarry_world::{Region, RegionPos, World};

use crate::events::DeferredSender;

/// Mutable state a packet handler may touch. Built fresh for every packet on
/// the scheduler thread, so handlers need no locking.
pub struct HandlerContext<'a> {
    pub(crate) world: &'a mut World,
    pub(crate) meshes: &'a mut MeshStore,
    pub(crate) ready: &'a mut bool,
    pub(crate) deferred: &'a DeferredSender,
}

impl HandlerContext<'_> {
    pub fn world(&self) -> &World {
        self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        self.world
    }

    /// Load a region, replacing any region at the same position. Meshes of
    /// the replaced region are dropped; sections the new one still carries
    /// are rebuilt.
    pub fn load_region(&mut self, region: Region) -> Option<Region> {
        self.meshes.remove_region(region.pos());
        self.world.load_region(region)
    }

    /// Unload a region and drop its meshes. In-flight builds for it still
    /// complete and release their slots.
    pub fn unload_region(&mut self, pos: RegionPos) -> bool {
        self.meshes.remove_region(pos);
        self.world.unload_region(pos).is_some()
    }

    /// Enter or leave the "ready" state (world joined and positioned).
    /// Simulation only advances while ready.
    pub fn set_ready(&mut self, ready: bool) {
        *self.ready = ready;
    }

    pub fn is_ready(&self) -> bool {
        *self.ready
    }

    pub fn deferred(&self) -> &DeferredSender {
        self.deferred
    }
}

/// Applies decoded packets to client state.
pub trait PacketHandler<P> {
    fn handle(&mut self, packet: P, ctx: &mut HandlerContext<'_>);
}

/// Client-side simulation: prediction and the fixed-rate game tick.
pub trait Simulation {
    /// Per-frame update scaled by the clamped delta.
    fn render_tick(&mut self, delta: f64);

    /// One constant-step simulation tick.
    fn tick(&mut self);

    /// Region the camera is in; dirty sections are scanned nearest-first.
    fn camera_region(&self) -> RegionPos;
}

/// Draw-call sink.
pub trait Renderer {
    /// Load textures and other GPU resources before the first frame.
    fn load_resources(&mut self);

    /// Draw one frame from the current set of section meshes.
    fn submit_frame(&mut self, delta: f64, meshes: &MeshStore);
}

/// Signalled once startup loading (textures, block registry) finishes.
pub struct LoadSignal {
    tx: Sender<()>,
}

impl LoadSignal {
    pub fn complete(self) {
        let _ = self.tx.send(());
    }
}

/// The receiving side of [`LoadSignal`]; waited on once before the loop.
pub struct LoadGate {
    rx: Receiver<()>,
}

impl LoadGate {
    /// Block until the signal fires. Returns `false` if the signal was
    /// dropped without completing.
    pub fn wait(self) -> bool {
        self.rx.recv().is_ok()
    }
}

/// Create a connected signal/gate pair.
pub fn load_gate() -> (LoadSignal, LoadGate) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    (LoadSignal { tx }, LoadGate { rx })
}
