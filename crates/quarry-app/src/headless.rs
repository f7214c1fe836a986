//! Headless collaborators for running the scheduler without a window or a
//! server: a small world protocol, a handler for it, a renderer that only
//! counts, and a packet feed that generates terrain and random edits.

use std::time::Duration;

use noise::{NoiseFn, Simplex};
use quarry_mesh::MeshStore;
use quarry_net::{PacketSource, ProtocolError};
use quarry_world::{AIR, BlockId, Region, RegionPos, SECTION_SIZE, Section, SectionBlocks};
use tracing::{debug, trace};

use crate::collab::{HandlerContext, PacketHandler, Renderer, Simulation};

pub const STONE: BlockId = BlockId(1);
pub const DIRT: BlockId = BlockId(2);
pub const GRASS: BlockId = BlockId(3);

/// Decoded world packets.
#[derive(Debug, Clone)]
pub enum WorldPacket {
    /// The server accepted us and positioned the player.
    JoinGame,
    /// Full content for one region, sections keyed by Y.
    LoadRegion {
        x: i32,
        z: i32,
        sections: Vec<(i32, SectionBlocks)>,
    },
    SetBlock {
        x: i32,
        y: i32,
        z: i32,
        block: BlockId,
    },
    UnloadRegion { x: i32, z: i32 },
}

/// Applies [`WorldPacket`]s to the world.
#[derive(Debug, Default)]
pub struct WorldPacketHandler {
    regions_loaded: u64,
    blocks_changed: u64,
}

impl WorldPacketHandler {
    pub fn regions_loaded(&self) -> u64 {
        self.regions_loaded
    }

    pub fn blocks_changed(&self) -> u64 {
        self.blocks_changed
    }
}

impl PacketHandler<WorldPacket> for WorldPacketHandler {
    fn handle(&mut self, packet: WorldPacket, ctx: &mut HandlerContext<'_>) {
        match packet {
            WorldPacket::JoinGame => {
                debug!("joined game");
                ctx.set_ready(true);
            }
            WorldPacket::LoadRegion { x, z, sections } => {
                let pos = RegionPos::new(x, z);
                let mut region = Region::new(pos);
                for (y, blocks) in sections {
                    region.insert_section(y, Section::from_blocks(blocks));
                }
                ctx.load_region(region);
                let world = ctx.world_mut();
                // Faces on the shared border were drawn against air.
                for (dx, dz) in [(-1, 0), (1, 0), (0, -1), (0, 1)] {
                    if let Some(neighbor) = world.region_mut(pos.offset(dx, dz)) {
                        for (_, section) in neighbor.sections_mut() {
                            section.mark_dirty();
                        }
                    }
                }
                self.regions_loaded += 1;
                trace!(x, z, "region loaded");
            }
            WorldPacket::SetBlock { x, y, z, block } => {
                if ctx.world_mut().set_block(x, y, z, block) {
                    self.blocks_changed += 1;
                }
            }
            WorldPacket::UnloadRegion { x, z } => {
                ctx.unload_region(RegionPos::new(x, z));
            }
        }
    }
}

/// Renderer that draws nothing and records what it was given.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    resources_loaded: bool,
    frames: u64,
    last_quads: usize,
}

impl HeadlessRenderer {
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn resources_loaded(&self) -> bool {
        self.resources_loaded
    }

    /// Quads across all meshes at the last submitted frame.
    pub fn last_quads(&self) -> usize {
        self.last_quads
    }
}

impl Renderer for HeadlessRenderer {
    fn load_resources(&mut self) {
        self.resources_loaded = true;
    }

    fn submit_frame(&mut self, _delta: f64, meshes: &MeshStore) {
        self.frames += 1;
        self.last_quads = meshes.total_quads();
    }
}

/// Simulation with a fixed camera that only counts its steps.
#[derive(Debug, Default)]
pub struct IdleSimulation {
    camera: RegionPos,
    render_ticks: u64,
    ticks: u64,
    predicted: f64,
}

impl IdleSimulation {
    pub fn new(camera: RegionPos) -> Self {
        Self {
            camera,
            ..Default::default()
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn render_ticks(&self) -> u64 {
        self.render_ticks
    }

    /// Sum of all render-tick deltas, in 60 Hz frames.
    pub fn predicted_frames(&self) -> f64 {
        self.predicted
    }
}

impl Simulation for IdleSimulation {
    fn render_tick(&mut self, delta: f64) {
        self.render_ticks += 1;
        self.predicted += delta;
    }

    fn tick(&mut self) {
        self.ticks += 1;
    }

    fn camera_region(&self) -> RegionPos {
        self.camera
    }
}

/// Heightmap terrain for the demo feed.
pub struct DemoTerrain {
    noise: Simplex,
    base_height: f64,
    amplitude: f64,
    frequency: f64,
}

impl DemoTerrain {
    pub fn new(seed: u32) -> Self {
        Self {
            noise: Simplex::new(seed),
            base_height: 24.0,
            amplitude: 10.0,
            frequency: 1.0 / 48.0,
        }
    }

    /// Surface height at a world column.
    pub fn height(&self, x: i32, z: i32) -> i32 {
        let n = self
            .noise
            .get([f64::from(x) * self.frequency, f64::from(z) * self.frequency]);
        (self.base_height + n * self.amplitude).round() as i32
    }

    /// Non-empty sections of region `(rx, rz)`.
    pub fn region(&self, rx: i32, rz: i32) -> Vec<(i32, SectionBlocks)> {
        let size = SECTION_SIZE;
        let mut columns = Vec::with_capacity((size * size) as usize);
        let mut top = 0;
        for lz in 0..size {
            for lx in 0..size {
                let h = self.height(rx * size + lx, rz * size + lz);
                top = top.max(h);
                columns.push(h);
            }
        }

        let mut sections = Vec::new();
        for sy in 0..=top.div_euclid(size) {
            let mut blocks = SectionBlocks::new();
            for lz in 0..size {
                for lx in 0..size {
                    let h = columns[(lz * size + lx) as usize];
                    for ly in 0..size {
                        let y = sy * size + ly;
                        let block = match h - y {
                            d if d < 0 => continue,
                            0 => GRASS,
                            1..=3 => DIRT,
                            _ => STONE,
                        };
                        blocks.set(lx as usize, ly as usize, lz as usize, block);
                    }
                }
            }
            if blocks.non_air_count() > 0 {
                sections.push((sy, blocks));
            }
        }
        sections
    }
}

/// Synthetic server: join, load a square of regions around the origin, then
/// send paced single-block edits until the limit, then close.
pub struct DemoFeed {
    terrain: DemoTerrain,
    radius: i32,
    pending_regions: Vec<(i32, i32)>,
    joined: bool,
    edits_left: u64,
    pace: Duration,
    rng: u64,
}

impl DemoFeed {
    pub fn new(seed: u32, radius: i32, edits: u64, pace: Duration) -> Self {
        let radius = radius.max(0);
        let mut pending_regions = Vec::new();
        for x in -radius..=radius {
            for z in -radius..=radius {
                pending_regions.push((x, z));
            }
        }
        // Popped from the back: nearest regions load first.
        pending_regions.sort_by_key(|&(x, z)| std::cmp::Reverse(x * x + z * z));
        Self {
            terrain: DemoTerrain::new(seed),
            radius,
            pending_regions,
            joined: false,
            edits_left: edits,
            pace,
            rng: u64::from(seed) | 1,
        }
    }

    // xorshift64
    fn next_random(&mut self) -> u64 {
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        self.rng
    }

    fn random_edit(&mut self) -> WorldPacket {
        let span = ((self.radius * 2 + 1) * SECTION_SIZE) as u64;
        let offset = i64::from(self.radius * SECTION_SIZE);
        let x = (self.next_random() % span) as i64 - offset;
        let z = (self.next_random() % span) as i64 - offset;
        let (x, z) = (x as i32, z as i32);
        let surface = self.terrain.height(x, z);
        let block = if self.next_random() % 2 == 0 {
            // Dig out the surface block.
            AIR
        } else {
            STONE
        };
        let y = if block.is_air() { surface } else { surface + 1 };
        WorldPacket::SetBlock { x, y, z, block }
    }
}

impl PacketSource<WorldPacket> for DemoFeed {
    fn next_packet(&mut self) -> Result<Option<WorldPacket>, ProtocolError> {
        if !self.joined {
            self.joined = true;
            return Ok(Some(WorldPacket::JoinGame));
        }
        if let Some((x, z)) = self.pending_regions.pop() {
            let sections = self.terrain.region(x, z);
            return Ok(Some(WorldPacket::LoadRegion { x, z, sections }));
        }
        if self.edits_left == 0 {
            return Ok(None);
        }
        self.edits_left -= 1;
        if !self.pace.is_zero() {
            std::thread::sleep(self.pace);
        }
        Ok(Some(self.random_edit()))
    }
}
