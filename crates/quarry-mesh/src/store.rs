//! Latest built mesh per section, as consumed by the renderer.

use quarry_world::{BuildPosition, RegionPos};
use rustc_hash::FxHashMap;

use crate::mesher::SectionMesh;

#[derive(Default)]
pub struct MeshStore {
    meshes: FxHashMap<BuildPosition, SectionMesh>,
}

impl MeshStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a mesh, replacing the previous one for the same section.
    /// Empty meshes remove the entry instead.
    pub fn insert(&mut self, position: BuildPosition, mesh: SectionMesh) -> Option<SectionMesh> {
        if mesh.is_empty() {
            return self.meshes.remove(&position);
        }
        self.meshes.insert(position, mesh)
    }

    pub fn get(&self, position: BuildPosition) -> Option<&SectionMesh> {
        self.meshes.get(&position)
    }

    pub fn remove(&mut self, position: BuildPosition) -> Option<SectionMesh> {
        self.meshes.remove(&position)
    }

    /// Drop every mesh belonging to `region`. Returns how many were removed.
    pub fn remove_region(&mut self, region: RegionPos) -> usize {
        let before = self.meshes.len();
        self.meshes.retain(|pos, _| pos.region != region);
        before - self.meshes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BuildPosition, &SectionMesh)> {
        self.meshes.iter()
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn total_quads(&self) -> usize {
        self.meshes.values().map(SectionMesh::quad_count).sum()
    }
}
