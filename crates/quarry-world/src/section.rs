//! Section block storage with copy-on-write snapshots.
//!
//! A [`Section`] keeps its blocks behind an [`Arc`]. Build jobs clone the
//! `Arc` rather than the blocks, and a later edit calls [`Arc::make_mut`],
//! which copies only while a worker still holds the old data. Workers
//! therefore always mesh a stable snapshot without any lock.

use std::fmt;
use std::sync::Arc;

use crate::position::{BuildPosition, Face, SECTION_SIZE};
use crate::state::SectionState;

/// Number of blocks in one section.
pub const SECTION_VOLUME: usize = (SECTION_SIZE * SECTION_SIZE * SECTION_SIZE) as usize;

/// Block state identifier. Interpretation belongs to the block registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u16);

/// The empty block.
pub const AIR: BlockId = BlockId(0);

impl BlockId {
    pub fn is_air(self) -> bool {
        self == AIR
    }
}

/// Dense 16³ block array in Y-major order (`y * 256 + z * 16 + x`).
#[derive(Clone, PartialEq, Eq)]
pub struct SectionBlocks {
    ids: Box<[BlockId]>,
}

impl SectionBlocks {
    /// An all-air section.
    pub fn new() -> Self {
        Self::filled(AIR)
    }

    /// A section where every block is `block`.
    pub fn filled(block: BlockId) -> Self {
        Self {
            ids: vec![block; SECTION_VOLUME].into_boxed_slice(),
        }
    }

    #[inline]
    fn index(x: usize, y: usize, z: usize) -> usize {
        debug_assert!(x < 16 && y < 16 && z < 16, "local coordinate out of range");
        (y << 8) | (z << 4) | x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> BlockId {
        self.ids[Self::index(x, y, z)]
    }

    /// Writes `block` and returns `true` if the stored value changed.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, block: BlockId) -> bool {
        let slot = &mut self.ids[Self::index(x, y, z)];
        if *slot == block {
            return false;
        }
        *slot = block;
        true
    }

    pub fn non_air_count(&self) -> usize {
        self.ids.iter().filter(|b| !b.is_air()).count()
    }
}

impl Default for SectionBlocks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SectionBlocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionBlocks")
            .field("non_air", &self.non_air_count())
            .finish()
    }
}

/// Immutable view of one section and its six neighbours, taken at dispatch.
///
/// Neighbours are indexed by [`Face::index`]; `None` means the neighbour
/// section is not loaded.
#[derive(Clone, Debug)]
pub struct SectionSnapshot {
    pub position: BuildPosition,
    pub blocks: Arc<SectionBlocks>,
    pub neighbors: [Option<Arc<SectionBlocks>>; 6],
}

impl SectionSnapshot {
    /// Snapshot with no neighbour data.
    pub fn isolated(position: BuildPosition, blocks: Arc<SectionBlocks>) -> Self {
        Self {
            position,
            blocks,
            neighbors: Default::default(),
        }
    }

    pub fn neighbor(&self, face: Face) -> Option<&SectionBlocks> {
        self.neighbors[face.index()].as_deref()
    }
}

/// One vertical slice of a region: its blocks plus its rebuild state.
#[derive(Clone, Debug, Default)]
pub struct Section {
    blocks: Arc<SectionBlocks>,
    state: SectionState,
}

impl Section {
    /// An all-air section with a clean state.
    pub fn new() -> Self {
        Self::default()
    }

    /// A freshly loaded section. Starts dirty so its first mesh gets built.
    pub fn from_blocks(blocks: SectionBlocks) -> Self {
        Self {
            blocks: Arc::new(blocks),
            state: SectionState::Dirty,
        }
    }

    pub fn blocks(&self) -> &SectionBlocks {
        &self.blocks
    }

    /// Shared handle to the current blocks, for build snapshots.
    pub fn shared_blocks(&self) -> Arc<SectionBlocks> {
        Arc::clone(&self.blocks)
    }

    pub fn block(&self, x: usize, y: usize, z: usize) -> BlockId {
        self.blocks.get(x, y, z)
    }

    /// Writes a block, copying the storage first if a build still shares it.
    /// Marks the section dirty when the value changed.
    pub fn set_block(&mut self, x: usize, y: usize, z: usize, block: BlockId) -> bool {
        if self.blocks.get(x, y, z) == block {
            return false;
        }
        Arc::make_mut(&mut self.blocks).set(x, y, z, block);
        self.state.mark_dirty();
        true
    }

    pub fn state(&self) -> SectionState {
        self.state
    }

    pub fn mark_dirty(&mut self) {
        self.state.mark_dirty();
    }

    pub fn begin_build(&mut self) -> bool {
        self.state.begin_build()
    }

    pub fn finish_build(&mut self) -> bool {
        self.state.finish_build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STONE: BlockId = BlockId(1);

    #[test]
    fn test_new_section_is_air_and_clean() {
        let s = Section::new();
        assert_eq!(s.blocks().non_air_count(), 0);
        assert_eq!(s.state(), SectionState::Clean);
    }

    #[test]
    fn test_loaded_section_starts_dirty() {
        let s = Section::from_blocks(SectionBlocks::filled(STONE));
        assert!(s.state().needs_build());
    }

    #[test]
    fn test_set_block_marks_dirty_only_on_change() {
        let mut s = Section::new();
        assert!(!s.set_block(1, 2, 3, AIR));
        assert_eq!(s.state(), SectionState::Clean);
        assert!(s.set_block(1, 2, 3, STONE));
        assert_eq!(s.block(1, 2, 3), STONE);
        assert_eq!(s.state(), SectionState::Dirty);
    }

    #[test]
    fn test_snapshot_is_stable_across_edits() {
        let mut s = Section::new();
        s.set_block(0, 0, 0, STONE);
        let snapshot = s.shared_blocks();

        s.set_block(0, 0, 0, AIR);
        s.set_block(5, 5, 5, STONE);

        assert_eq!(snapshot.get(0, 0, 0), STONE);
        assert_eq!(snapshot.get(5, 5, 5), AIR);
        assert_eq!(s.block(0, 0, 0), AIR);
    }

    #[test]
    fn test_edit_while_building_leaves_section_dirty() {
        let mut s = Section::from_blocks(SectionBlocks::new());
        assert!(s.begin_build());
        s.set_block(3, 3, 3, STONE);
        assert_eq!(s.state(), SectionState::BuildingDirty);
        s.finish_build();
        assert_eq!(s.state(), SectionState::Dirty);
    }

    #[test]
    fn test_isolated_snapshot_has_no_neighbors() {
        let snap = SectionSnapshot::isolated(
            BuildPosition::new(0, 0, 0),
            Arc::new(SectionBlocks::new()),
        );
        assert!(Face::ALL.iter().all(|f| snap.neighbor(*f).is_none()));
    }
}
