//! Per-frame coordination of network events, section builds, simulation
//! ticks, and render submission.
//!
//! All scheduling state lives here and is touched only by the thread calling
//! [`FrameScheduler::run_frame`]: the free-slot budget, section states, the
//! world, and the mesh store. Other threads talk to it only through channels.
//!
//! Each frame runs four phases in order:
//!
//! 1. **Drain**: take events one at a time from the error, packet,
//!    completion, and deferred channels until none is ready. Never blocks.
//! 2. **Tick**: when ready, advance prediction by the clamped delta and run
//!    at most one fixed-rate simulation tick.
//! 3. **Render**: submit the frame.
//! 4. **Dispatch**: walk regions nearest-first and their sections bottom-up,
//!    starting a build for each dirty, idle section until no slot is free.

use std::sync::Arc;
use std::time::Instant;

use quarry_config::SchedulerConfig;
use quarry_mesh::{
    BuildCompletion, BuildJob, BuildOutcome, BuildPool, BuilderBudget, CompletionSender,
    MeshStore, SectionMesher,
};
use quarry_net::{NetworkLink, ProtocolError};
use quarry_world::{BuildPosition, RegionPos, World};
use rustc_hash::FxHashSet;
use tracing::{debug, error, info, trace, warn};

use crate::clock::{FixedTicker, FrameClock};
use crate::collab::{HandlerContext, LoadGate, PacketHandler, Renderer, Simulation};
use crate::events::{DeferredSender, EventChannels, FrameEvent, Polled};

/// Errors that stop the frame loop.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A protocol error arrived on the error channel. Not recoverable.
    #[error("fatal protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Startup loading was abandoned before signalling completion.
    #[error("resource loading aborted before completion")]
    LoadAborted,

    /// A worker thread could not be spawned.
    #[error("failed to start build workers: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The phase a frame is in. Phases run in declaration order, once each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FramePhase {
    Draining,
    Ticking,
    Rendering,
    Dispatching,
}

/// What one frame did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameReport {
    /// Clamped, 60 Hz-normalized delta used this frame.
    pub delta: f64,
    pub packets: usize,
    pub completions: usize,
    pub deferred: usize,
    /// Whether a fixed-rate simulation tick ran.
    pub ticked: bool,
    /// Sections whose builds were started, in dispatch order.
    pub dispatched: Vec<BuildPosition>,
}

/// Running totals across all frames.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub ticks: u64,
    pub packets: u64,
    pub deferred: u64,
    pub builds_dispatched: u64,
    pub builds_completed: u64,
    pub builds_failed: u64,
    /// Completions whose section had been unloaded, or unloaded and reloaded,
    /// by the time they arrived. No mesh is applied for these.
    pub builds_orphaned: u64,
}

/// The per-frame driver.
pub struct FrameScheduler<P, H> {
    clock: FrameClock,
    ticker: FixedTicker,
    events: EventChannels<P>,
    deferred: DeferredSender,
    budget: BuilderBudget,
    pool: BuildPool,
    /// Positions with a build in flight. Survives region unloads, so a
    /// reloaded section is not dispatched again until its old build reports.
    in_flight: FxHashSet<BuildPosition>,
    world: World,
    meshes: MeshStore,
    handler: H,
    ready: bool,
    phase: FramePhase,
    stats: FrameStats,
}

impl<P, H> FrameScheduler<P, H>
where
    H: PacketHandler<P>,
{
    /// Build a scheduler and start its worker pool.
    ///
    /// The pool has `config.resolved_pool_capacity()` workers, and the same
    /// number of builds may be in flight at once.
    pub fn new(
        config: &SchedulerConfig,
        link: NetworkLink<P>,
        handler: H,
        mesher: Arc<dyn SectionMesher>,
    ) -> Result<Self, SchedulerError> {
        let capacity = config.resolved_pool_capacity();
        // At most `capacity` builds are in flight and each reports once, so
        // workers never block on this channel.
        let (completion_tx, completion_rx) = crossbeam_channel::bounded(capacity);
        let pool = BuildPool::new(capacity, mesher, CompletionSender::new(completion_tx))?;
        let events = EventChannels::new(link, completion_rx);
        let deferred = events.deferred_sender();
        let (min_delta, max_delta) = config.delta_bounds();

        info!(
            pool_capacity = capacity,
            tick_rate_hz = config.tick_rate_hz,
            "frame scheduler created"
        );

        Ok(Self {
            clock: FrameClock::new(min_delta, max_delta),
            ticker: FixedTicker::new(config.tick_rate_hz),
            events,
            deferred,
            budget: BuilderBudget::new(capacity),
            pool,
            in_flight: FxHashSet::default(),
            world: World::new(),
            meshes: MeshStore::new(),
            handler,
            ready: false,
            phase: FramePhase::Dispatching,
            stats: FrameStats::default(),
        })
    }

    /// Wait for startup loading, then let the renderer load its resources.
    ///
    /// This is the only blocking wait; it happens once, before the loop.
    pub fn start(
        &mut self,
        gate: LoadGate,
        renderer: &mut impl Renderer,
    ) -> Result<(), SchedulerError> {
        if !gate.wait() {
            return Err(SchedulerError::LoadAborted);
        }
        renderer.load_resources();
        let now = Instant::now();
        self.clock.reset(now);
        self.ticker.reset(now);
        info!("resources loaded, entering frame loop");
        Ok(())
    }

    /// Run one frame at the current wall-clock time.
    pub fn run_frame(
        &mut self,
        sim: &mut impl Simulation,
        renderer: &mut impl Renderer,
    ) -> Result<FrameReport, SchedulerError> {
        self.run_frame_at(Instant::now(), sim, renderer)
    }

    /// Run one frame as if the current time were `now`.
    ///
    /// On a fatal error the frame stops in the drain phase: nothing is
    /// ticked, rendered, or dispatched.
    pub fn run_frame_at(
        &mut self,
        now: Instant,
        sim: &mut impl Simulation,
        renderer: &mut impl Renderer,
    ) -> Result<FrameReport, SchedulerError> {
        let mut report = FrameReport {
            delta: self.clock.advance(now),
            ..Default::default()
        };

        self.enter(FramePhase::Draining);
        self.drain(&mut report)?;

        self.enter(FramePhase::Ticking);
        if self.ready {
            sim.render_tick(report.delta);
            if self.ticker.poll(now) {
                sim.tick();
                report.ticked = true;
                self.stats.ticks += 1;
            }
        }

        self.enter(FramePhase::Rendering);
        renderer.submit_frame(report.delta, &self.meshes);

        self.enter(FramePhase::Dispatching);
        self.dispatch(sim.camera_region(), &mut report);

        self.stats.frames += 1;
        Ok(report)
    }

    fn enter(&mut self, next: FramePhase) {
        debug_assert!(
            next > self.phase || next == FramePhase::Draining,
            "frame phase {next:?} entered after {:?}",
            self.phase
        );
        self.phase = next;
    }

    /// Process ready events one at a time until every source is empty.
    fn drain(&mut self, report: &mut FrameReport) -> Result<(), SchedulerError> {
        loop {
            match self.events.poll() {
                Polled::Empty => return Ok(()),
                Polled::Closed(source) => self.events.close(source),
                Polled::Event(FrameEvent::Fatal(err)) => {
                    error!(%err, "fatal protocol error");
                    return Err(SchedulerError::Protocol(err));
                }
                Polled::Event(FrameEvent::Packet(packet)) => {
                    let mut ctx = HandlerContext {
                        world: &mut self.world,
                        meshes: &mut self.meshes,
                        ready: &mut self.ready,
                        deferred: &self.deferred,
                    };
                    self.handler.handle(packet, &mut ctx);
                    report.packets += 1;
                    self.stats.packets += 1;
                }
                Polled::Event(FrameEvent::Completion(done)) => {
                    self.complete(done);
                    report.completions += 1;
                }
                Polled::Event(FrameEvent::Deferred(callback)) => {
                    callback();
                    report.deferred += 1;
                    self.stats.deferred += 1;
                }
            }
        }
    }

    /// Release the slot, then clear the section's in-flight state if it still
    /// exists. A failed build re-dirties the section so it is retried.
    fn complete(&mut self, done: BuildCompletion) {
        let BuildCompletion { position, outcome } = done;
        self.budget.release();
        self.in_flight.remove(&position);

        // A section reloaded at this position was never building; the result
        // belongs to the unloaded one.
        let Some(section) = self
            .world
            .section_mut(position)
            .filter(|s| s.state().is_building())
        else {
            trace!(?position, "completion for unloaded section");
            self.stats.builds_orphaned += 1;
            return;
        };
        section.finish_build();

        match outcome {
            BuildOutcome::Built(mesh) => {
                self.meshes.insert(position, mesh);
                self.stats.builds_completed += 1;
            }
            BuildOutcome::Failed(err) => {
                debug!(?position, %err, "section build failed, retrying");
                section.mark_dirty();
                self.stats.builds_failed += 1;
            }
        }
    }

    /// Start builds for dirty sections, nearest region first, until the
    /// budget runs out. The next frame restarts the scan from the top.
    fn dispatch(&mut self, camera: RegionPos, report: &mut FrameReport) {
        'scan: for region_pos in self.world.regions_by_distance(camera) {
            let candidates: Vec<i32> = match self.world.region(region_pos) {
                Some(region) => region
                    .sections()
                    .filter(|(_, s)| s.state().needs_build())
                    .map(|(y, _)| y)
                    .collect(),
                None => continue,
            };

            for y in candidates {
                if self.budget.is_exhausted() {
                    break 'scan;
                }
                let position = BuildPosition {
                    region: region_pos,
                    y,
                };
                if self.in_flight.contains(&position) {
                    continue;
                }
                let Some(snapshot) = self.world.snapshot(position) else {
                    continue;
                };
                if !self.budget.try_acquire() {
                    break 'scan;
                }
                if let Some(section) = self.world.section_mut(position) {
                    section.begin_build();
                }
                self.in_flight.insert(position);

                if let Err(job) = self.pool.submit(BuildJob::new(snapshot)) {
                    warn!(position = ?job.position(), "build pool unavailable, section left dirty");
                    self.budget.release();
                    self.in_flight.remove(&position);
                    if let Some(section) = self.world.section_mut(position) {
                        section.finish_build();
                        section.mark_dirty();
                    }
                    break 'scan;
                }

                trace!(?position, free = self.budget.free(), "section build dispatched");
                report.dispatched.push(position);
                self.stats.builds_dispatched += 1;
            }
        }
    }

    /// Handle for queueing work onto the scheduler thread.
    pub fn deferred_sender(&self) -> DeferredSender {
        self.deferred.clone()
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn meshes(&self) -> &MeshStore {
        &self.meshes
    }

    pub fn budget(&self) -> &BuilderBudget {
        &self.budget
    }

    /// Number of builds dispatched but not yet observed complete.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Completions buffered but not yet drained.
    pub fn pending_completions(&self) -> usize {
        self.events.pending_completions()
    }

    /// The last phase entered.
    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    use crossbeam_channel::{Receiver, Sender};
    use quarry_mesh::{BuildError, CulledMesher, SectionMesh};
    use quarry_world::{BlockId, Region, Section, SectionBlocks, SectionSnapshot, SectionState};

    use super::*;
    use crate::collab::load_gate;

    const STONE: BlockId = BlockId(1);

    enum TestPacket {
        Join,
        Load(i32, i32),
        SetBlock(i32, i32, i32, u16),
        Unload(i32, i32),
    }

    #[derive(Default)]
    struct TestHandler {
        handled: usize,
    }

    impl PacketHandler<TestPacket> for TestHandler {
        fn handle(&mut self, packet: TestPacket, ctx: &mut HandlerContext<'_>) {
            self.handled += 1;
            match packet {
                TestPacket::Join => ctx.set_ready(true),
                TestPacket::Load(x, z) => {
                    ctx.world_mut().load_region(Region::new(RegionPos::new(x, z)));
                }
                TestPacket::SetBlock(x, y, z, id) => {
                    ctx.world_mut().set_block(x, y, z, BlockId(id));
                }
                TestPacket::Unload(x, z) => {
                    ctx.unload_region(RegionPos::new(x, z));
                }
            }
        }
    }

    struct TestSim {
        render_ticks: usize,
        ticks: usize,
        last_delta: f64,
        camera: RegionPos,
    }

    impl Simulation for TestSim {
        fn render_tick(&mut self, delta: f64) {
            self.render_ticks += 1;
            self.last_delta = delta;
        }

        fn tick(&mut self) {
            self.ticks += 1;
        }

        fn camera_region(&self) -> RegionPos {
            self.camera
        }
    }

    #[derive(Default)]
    struct TestRenderer {
        loaded: bool,
        frames: usize,
        meshes_seen: usize,
    }

    impl Renderer for TestRenderer {
        fn load_resources(&mut self) {
            self.loaded = true;
        }

        fn submit_frame(&mut self, _delta: f64, meshes: &MeshStore) {
            self.frames += 1;
            self.meshes_seen = meshes.len();
        }
    }

    /// Culled mesher whose builds for chosen positions block until opened,
    /// and which can be told to fail or panic once per position.
    #[derive(Default)]
    struct GatedMesher {
        gates: HashMap<BuildPosition, Receiver<()>>,
        fail_once: Mutex<HashSet<BuildPosition>>,
        panic_once: Mutex<HashSet<BuildPosition>>,
    }

    impl SectionMesher for GatedMesher {
        fn build(&self, snapshot: &SectionSnapshot) -> Result<SectionMesh, BuildError> {
            if let Some(gate) = self.gates.get(&snapshot.position) {
                let _ = gate.recv();
            }
            if self.panic_once.lock().unwrap().remove(&snapshot.position) {
                panic!("mesher blew up");
            }
            if self.fail_once.lock().unwrap().remove(&snapshot.position) {
                return Err(BuildError::Mesher("missing neighbour".into()));
            }
            CulledMesher.build(snapshot)
        }
    }

    // `gates` is declared first so it drops before the scheduler joins its
    // workers.
    struct Rig {
        gates: HashMap<BuildPosition, Sender<()>>,
        sched: FrameScheduler<TestPacket, TestHandler>,
        packets: Sender<TestPacket>,
        errors: Sender<ProtocolError>,
        sim: TestSim,
        renderer: TestRenderer,
        now: Instant,
    }

    fn rig(capacity: usize, gated: &[BuildPosition]) -> Rig {
        rig_with(capacity, gated, GatedMesher::default())
    }

    fn rig_with(capacity: usize, gated: &[BuildPosition], mut mesher: GatedMesher) -> Rig {
        let mut gates = HashMap::new();
        for &pos in gated {
            let (tx, rx) = crossbeam_channel::bounded(1);
            gates.insert(pos, tx);
            mesher.gates.insert(pos, rx);
        }
        let (packets, packet_rx) = crossbeam_channel::unbounded();
        let (errors, error_rx) = crossbeam_channel::bounded(1);
        let link = NetworkLink {
            packets: packet_rx,
            errors: error_rx,
        };
        let config = SchedulerConfig {
            pool_capacity: capacity,
            ..Default::default()
        };
        let sched =
            FrameScheduler::new(&config, link, TestHandler::default(), Arc::new(mesher)).unwrap();
        Rig {
            gates,
            sched,
            packets,
            errors,
            sim: TestSim {
                render_ticks: 0,
                ticks: 0,
                last_delta: 0.0,
                camera: RegionPos::new(0, 0),
            },
            renderer: TestRenderer::default(),
            now: Instant::now(),
        }
    }

    impl Rig {
        fn frame(&mut self) -> FrameReport {
            self.now += Duration::from_millis(16);
            self.sched
                .run_frame_at(self.now, &mut self.sim, &mut self.renderer)
                .unwrap()
        }

        fn open(&mut self, pos: BuildPosition) {
            self.gates.remove(&pos);
        }

        fn wait_for_completions(&self, n: usize) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.sched.pending_completions() < n {
                assert!(Instant::now() < deadline, "timed out waiting for {n} completions");
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        /// Run frames until nothing is in flight.
        fn settle(&mut self) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.sched.in_flight() > 0 {
                assert!(Instant::now() < deadline, "builds never settled");
                std::thread::sleep(Duration::from_millis(1));
                self.frame();
            }
        }

        fn state(&self, pos: BuildPosition) -> SectionState {
            self.sched.world().section(pos).unwrap().state()
        }

        /// Budget and in-flight set agree with the section states.
        fn assert_budget_consistent(&self) {
            let budget = self.sched.budget();
            assert!(budget.free() <= budget.capacity());
            assert_eq!(budget.in_flight(), self.sched.in_flight());
            assert!(self.sched.world().building_count() <= budget.in_flight());
        }
    }

    fn dirty_section() -> Section {
        Section::from_blocks(SectionBlocks::filled(STONE))
    }

    /// Region (0,0) with dirty sections at each `y`.
    fn load_dirty(rig: &mut Rig, ys: impl IntoIterator<Item = i32>) {
        let mut region = Region::new(RegionPos::new(0, 0));
        for y in ys {
            region.insert_section(y, dirty_section());
        }
        rig.sched.world_mut().load_region(region);
    }

    #[test]
    fn test_dispatch_stops_at_capacity_and_resumes_with_freed_slots() {
        let positions: Vec<_> = (0..7).map(|y| BuildPosition::new(0, y, 0)).collect();
        let mut rig = rig(4, &positions);
        load_dirty(&mut rig, 0..5);
        {
            let region = rig.sched.world_mut().region_mut(RegionPos::new(0, 0)).unwrap();
            region.insert_section(5, Section::new());
            region.insert_section(6, Section::new());
        }

        let report = rig.frame();
        assert_eq!(report.dispatched, positions[0..4].to_vec());
        assert!(rig.sched.budget().is_exhausted());
        assert_eq!(rig.state(positions[4]), SectionState::Dirty);
        rig.assert_budget_consistent();

        rig.open(positions[0]);
        rig.open(positions[1]);
        rig.sched.world_mut().mark_section_dirty(positions[5]);
        rig.sched.world_mut().mark_section_dirty(positions[6]);
        rig.wait_for_completions(2);

        let report = rig.frame();
        assert_eq!(report.completions, 2);
        assert_eq!(report.dispatched, vec![positions[4], positions[5]]);
        assert_eq!(rig.state(positions[0]), SectionState::Clean);
        assert_eq!(rig.state(positions[6]), SectionState::Dirty);
        assert!(rig.sched.budget().is_exhausted());
        rig.assert_budget_consistent();
    }

    #[test]
    fn test_building_section_is_not_dispatched_twice() {
        let pos = BuildPosition::new(0, 0, 0);
        let mut rig = rig(4, &[pos]);
        load_dirty(&mut rig, [0]);

        assert_eq!(rig.frame().dispatched, vec![pos]);
        rig.sched.world_mut().set_block(1, 1, 1, BlockId(2));
        assert_eq!(rig.state(pos), SectionState::BuildingDirty);

        for _ in 0..3 {
            assert!(rig.frame().dispatched.is_empty());
            assert_eq!(rig.sched.budget().in_flight(), 1);
        }
    }

    #[test]
    fn test_mutation_during_build_is_rebuilt() {
        let pos = BuildPosition::new(0, 0, 0);
        let mut rig = rig(2, &[pos]);
        load_dirty(&mut rig, [0]);

        rig.frame();
        rig.sched.world_mut().set_block(3, 3, 3, BlockId(9));
        rig.open(pos);
        rig.wait_for_completions(1);

        let report = rig.frame();
        assert_eq!(report.completions, 1);
        // Re-dispatched in the same frame's dispatch phase.
        assert_eq!(report.dispatched, vec![pos]);
        rig.settle();
        assert_eq!(rig.state(pos), SectionState::Clean);
        assert_eq!(rig.sched.stats().builds_completed, 2);
    }

    #[test]
    fn test_budget_tracks_in_flight_builds_across_frames() {
        let positions: Vec<_> = (0..6).map(|y| BuildPosition::new(0, y, 0)).collect();
        let mut rig = rig(3, &positions);
        load_dirty(&mut rig, 0..6);

        rig.frame();
        rig.assert_budget_consistent();
        for (i, &pos) in positions.iter().enumerate() {
            rig.open(pos);
            rig.sched.world_mut().set_block(0, pos.y * 16, 0, BlockId(i as u16 + 2));
            rig.frame();
            rig.assert_budget_consistent();
        }
        rig.settle();
        rig.assert_budget_consistent();
        assert_eq!(rig.sched.budget().free(), 3);
        assert_eq!(rig.sched.world().building_count(), 0);
    }

    #[test]
    fn test_packets_split_across_frames_give_same_world() {
        let script = || {
            let mut packets = vec![TestPacket::Load(0, 0), TestPacket::Load(1, 0)];
            for i in 0..40 {
                packets.push(TestPacket::SetBlock(i % 32, i, (i * 7) % 16, (i % 5) as u16));
            }
            packets.push(TestPacket::SetBlock(5, 5, 5, 0));
            packets
        };

        let mut single = rig(2, &[]);
        for p in script() {
            single.packets.send(p).unwrap();
        }
        assert_eq!(single.frame().packets, script().len());

        let mut spread = rig(2, &[]);
        let mut pending = script().into_iter().peekable();
        while pending.peek().is_some() {
            for p in pending.by_ref().take(5) {
                spread.packets.send(p).unwrap();
            }
            spread.frame();
        }

        for x in 0..32 {
            for y in 0..40 {
                for z in 0..16 {
                    assert_eq!(
                        single.sched.world().block(x, y, z),
                        spread.sched.world().block(x, y, z),
                        "block ({x},{y},{z}) differs"
                    );
                }
            }
        }
    }

    #[test]
    fn test_delta_is_clamped_per_frame() {
        let mut rig = rig(1, &[]);
        rig.packets.send(TestPacket::Join).unwrap();
        let frame_len = Duration::from_nanos(1_000_000_000 / 60);
        let cases = [
            (frame_len / 100, 0.3),
            (frame_len, 1.0),
            (frame_len * 1000, 1.6),
        ];
        for (elapsed, expected) in cases {
            rig.now += elapsed;
            let report = rig
                .sched
                .run_frame_at(rig.now, &mut rig.sim, &mut rig.renderer)
                .unwrap();
            assert!((report.delta - expected).abs() < 1e-3, "got {}", report.delta);
        }
        assert!((rig.sim.last_delta - 1.6).abs() < 1e-3);
    }

    #[test]
    fn test_fatal_error_skips_rest_of_frame() {
        let mut rig = rig(2, &[]);
        load_dirty(&mut rig, [0]);
        rig.sched.set_ready(true);
        rig.errors.send(ProtocolError::Decode("bad frame".into())).unwrap();

        rig.now += Duration::from_secs(1);
        let result = rig.sched.run_frame_at(rig.now, &mut rig.sim, &mut rig.renderer);

        assert!(matches!(result, Err(SchedulerError::Protocol(_))));
        assert_eq!(rig.sched.phase(), FramePhase::Draining);
        assert_eq!(rig.renderer.frames, 0);
        assert_eq!(rig.sim.render_ticks, 0);
        assert_eq!(rig.sched.budget().free(), 2);
        assert_eq!(rig.state(BuildPosition::new(0, 0, 0)), SectionState::Dirty);
    }

    #[test]
    fn test_failed_build_is_retried() {
        let pos = BuildPosition::new(0, 0, 0);
        let mesher = GatedMesher::default();
        mesher.fail_once.lock().unwrap().insert(pos);
        let mut rig = rig_with(1, &[], mesher);
        load_dirty(&mut rig, [0]);

        rig.frame();
        rig.wait_for_completions(1);
        let report = rig.frame();
        assert_eq!(report.dispatched, vec![pos]);
        rig.settle();

        assert_eq!(rig.sched.stats().builds_failed, 1);
        assert_eq!(rig.state(pos), SectionState::Clean);
        assert!(rig.sched.meshes().get(pos).is_some());
    }

    #[test]
    fn test_panicking_build_still_releases_slot() {
        let pos = BuildPosition::new(0, 0, 0);
        let mesher = GatedMesher::default();
        mesher.panic_once.lock().unwrap().insert(pos);
        let mut rig = rig_with(1, &[], mesher);
        load_dirty(&mut rig, [0]);

        rig.frame();
        rig.settle();
        assert_eq!(rig.sched.budget().free(), 1);
        assert_eq!(rig.sched.stats().builds_failed, 1);
        assert_eq!(rig.state(pos), SectionState::Clean);
    }

    #[test]
    fn test_completion_after_unload_only_releases_slot() {
        let pos = BuildPosition::new(0, 0, 0);
        let mut rig = rig(2, &[pos]);
        load_dirty(&mut rig, [0]);

        rig.frame();
        rig.packets.send(TestPacket::Unload(0, 0)).unwrap();
        rig.frame();
        assert!(rig.sched.world().region(RegionPos::new(0, 0)).is_none());

        // Reloaded before the old build reports: not dispatched again yet.
        load_dirty(&mut rig, [0]);
        assert!(rig.frame().dispatched.is_empty());

        rig.open(pos);
        rig.wait_for_completions(1);
        let report = rig.frame();
        assert_eq!(report.completions, 1);
        assert_eq!(report.dispatched, vec![pos]);
        assert_eq!(rig.sched.stats().builds_orphaned, 1);
        rig.settle();
        assert_eq!(rig.sched.budget().free(), 2);
    }

    #[test]
    fn test_mesh_of_unloaded_section_not_applied_to_reloaded_one() {
        let pos = BuildPosition::new(0, 0, 0);
        let mut rig = rig(2, &[pos]);
        let mut blocks = SectionBlocks::new();
        blocks.set(1, 1, 1, STONE);
        let mut region = Region::new(RegionPos::new(0, 0));
        region.insert_section(0, Section::from_blocks(blocks));
        rig.sched.world_mut().load_region(region);

        assert_eq!(rig.frame().dispatched, vec![pos]);
        rig.packets.send(TestPacket::Unload(0, 0)).unwrap();
        rig.frame();

        let mut region = Region::new(RegionPos::new(0, 0));
        region.insert_section(0, Section::from_blocks(SectionBlocks::new()));
        rig.sched.world_mut().load_region(region);

        rig.open(pos);
        rig.wait_for_completions(1);
        let report = rig.frame();
        assert_eq!(report.completions, 1);
        assert_eq!(rig.renderer.meshes_seen, 0);
        assert!(rig.sched.meshes().get(pos).is_none());
        assert_eq!(rig.sched.stats().builds_orphaned, 1);
        assert_eq!(rig.sched.stats().builds_completed, 0);

        // The reloaded section still gets its own build.
        assert_eq!(report.dispatched, vec![pos]);
        rig.settle();
        assert!(rig.sched.meshes().get(pos).is_none());
        assert_eq!(rig.state(pos), SectionState::Clean);
        rig.assert_budget_consistent();
    }

    #[test]
    fn test_nearest_region_dispatched_first() {
        let mut rig = rig(1, &[]);
        rig.sim.camera = RegionPos::new(5, 5);
        for (x, z) in [(0, 0), (5, 6), (9, 9)] {
            let mut region = Region::new(RegionPos::new(x, z));
            region.insert_section(0, dirty_section());
            rig.sched.world_mut().load_region(region);
        }
        assert_eq!(rig.frame().dispatched, vec![BuildPosition::new(5, 0, 6)]);
    }

    #[test]
    fn test_deferred_runs_before_render() {
        let mut rig = rig(1, &[]);
        let sender = rig.sched.deferred_sender();
        let (tx, rx) = crossbeam_channel::unbounded();
        std::thread::spawn(move || {
            sender.enqueue_deferred(move || {
                let _ = tx.send("ran");
            });
        })
        .join()
        .unwrap();

        let report = rig.frame();
        assert_eq!(report.deferred, 1);
        assert_eq!(rx.try_recv(), Ok("ran"));
    }

    #[test]
    fn test_simulation_waits_for_ready() {
        let mut rig = rig(1, &[]);
        rig.now += Duration::from_secs(1);
        rig.frame();
        assert_eq!(rig.sim.render_ticks, 0);
        assert_eq!(rig.renderer.frames, 1);

        rig.packets.send(TestPacket::Join).unwrap();
        rig.now += Duration::from_secs(1);
        let report = rig.frame();
        assert!(rig.sched.is_ready());
        assert!(report.ticked);
        assert_eq!(rig.sim.render_ticks, 1);
        assert_eq!(rig.sim.ticks, 1);
    }

    #[test]
    fn test_built_meshes_reach_renderer() {
        let mut rig = rig(2, &[]);
        load_dirty(&mut rig, [0, 1]);
        rig.frame();
        rig.settle();
        rig.frame();
        assert_eq!(rig.renderer.meshes_seen, 2);
        assert!(rig.sched.meshes().total_quads() > 0);
    }

    #[test]
    fn test_start_waits_for_load_then_loads_resources() {
        let mut rig = rig(1, &[]);
        let (signal, gate) = load_gate();
        std::thread::spawn(move || signal.complete());
        rig.sched.start(gate, &mut rig.renderer).unwrap();
        assert!(rig.renderer.loaded);
    }

    #[test]
    fn test_start_fails_when_loader_gives_up() {
        let mut rig = rig(1, &[]);
        let (signal, gate) = load_gate();
        drop(signal);
        let err = rig.sched.start(gate, &mut rig.renderer).unwrap_err();
        assert!(matches!(err, SchedulerError::LoadAborted));
        assert!(!rig.renderer.loaded);
    }

    #[test]
    fn test_handler_sees_every_packet_once() {
        let mut rig = rig(1, &[]);
        for _ in 0..10 {
            rig.packets.send(TestPacket::Join).unwrap();
        }
        rig.frame();
        rig.frame();
        assert_eq!(rig.sched.handler().handled, 10);
        assert_eq!(rig.sched.stats().packets, 10);
        assert_eq!(rig.sched.stats().frames, 2);
    }
}
