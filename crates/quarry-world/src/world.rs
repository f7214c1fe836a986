//! Owner of all loaded regions, keyed by [`RegionPos`].
//!
//! Only the scheduler thread touches the [`World`]. Packet handlers mutate it
//! during the drain phase; the dispatch phase reads snapshots out of it.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::position::{BuildPosition, Face, RegionPos, SECTION_SIZE, block_to_section};
use crate::region::Region;
use crate::section::{AIR, BlockId, Section, SectionSnapshot};

/// All currently loaded regions.
#[derive(Default)]
pub struct World {
    regions: FxHashMap<RegionPos, Region>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a region, replacing and returning any previous one at its position.
    pub fn load_region(&mut self, region: Region) -> Option<Region> {
        self.regions.insert(region.pos(), region)
    }

    /// Remove a region. Builds already in flight for it still complete; their
    /// results find no section and are discarded.
    pub fn unload_region(&mut self, pos: RegionPos) -> Option<Region> {
        self.regions.remove(&pos)
    }

    pub fn region(&self, pos: RegionPos) -> Option<&Region> {
        self.regions.get(&pos)
    }

    pub fn region_mut(&mut self, pos: RegionPos) -> Option<&mut Region> {
        self.regions.get_mut(&pos)
    }

    pub fn section(&self, pos: BuildPosition) -> Option<&Section> {
        self.regions.get(&pos.region)?.section(pos.y)
    }

    pub fn section_mut(&mut self, pos: BuildPosition) -> Option<&mut Section> {
        self.regions.get_mut(&pos.region)?.section_mut(pos.y)
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Block at a world coordinate. Unloaded space reads as air.
    pub fn block(&self, x: i32, y: i32, z: i32) -> BlockId {
        let (pos, (lx, ly, lz)) = block_to_section(x, y, z);
        self.section(pos)
            .map(|s| s.block(lx, ly, lz))
            .unwrap_or(AIR)
    }

    /// Set a block at a world coordinate.
    ///
    /// The owning section is created on demand inside a loaded region. When
    /// the block changed, the owning section is marked dirty, and so is each
    /// loaded neighbour section that shares the touched boundary, since its
    /// culled faces depend on this block.
    ///
    /// Returns `false` if the region is not loaded or the block was unchanged.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, block: BlockId) -> bool {
        let (pos, (lx, ly, lz)) = block_to_section(x, y, z);
        let Some(region) = self.regions.get_mut(&pos.region) else {
            trace!(x, y, z, "set_block in unloaded region ignored");
            return false;
        };
        if block.is_air() && region.section(pos.y).is_none() {
            return false;
        }
        if !region.section_or_insert(pos.y).set_block(lx, ly, lz, block) {
            return false;
        }

        let edge = (SECTION_SIZE - 1) as usize;
        let touched = [
            (lx == 0, Face::NegX),
            (lx == edge, Face::PosX),
            (ly == 0, Face::NegY),
            (ly == edge, Face::PosY),
            (lz == 0, Face::NegZ),
            (lz == edge, Face::PosZ),
        ];
        for (on_edge, face) in touched {
            if on_edge {
                self.mark_section_dirty(pos.neighbor(face));
            }
        }
        true
    }

    /// Mark a section dirty. Returns `false` if it is not loaded.
    pub fn mark_section_dirty(&mut self, pos: BuildPosition) -> bool {
        match self.section_mut(pos) {
            Some(section) => {
                section.mark_dirty();
                true
            }
            None => false,
        }
    }

    /// Capture the section at `pos` and its loaded neighbours for a build.
    pub fn snapshot(&self, pos: BuildPosition) -> Option<SectionSnapshot> {
        let section = self.section(pos)?;
        let mut snapshot = SectionSnapshot::isolated(pos, section.shared_blocks());
        for face in Face::ALL {
            snapshot.neighbors[face.index()] =
                self.section(pos.neighbor(face)).map(Section::shared_blocks);
        }
        Some(snapshot)
    }

    /// Loaded regions ordered nearest-first from `center`.
    ///
    /// Ties break on `x` then `z` so the order is deterministic.
    pub fn regions_by_distance(&self, center: RegionPos) -> Vec<RegionPos> {
        let mut positions: Vec<RegionPos> = self.regions.keys().copied().collect();
        positions.sort_by_key(|p| (p.distance_squared(center), p.x, p.z));
        positions
    }

    /// Total sections with a build in flight across all loaded regions.
    pub fn building_count(&self) -> usize {
        self.regions.values().map(Region::building_count).sum()
    }
}
