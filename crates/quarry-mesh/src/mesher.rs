//! Section mesh data and the meshing trait run on worker threads.

use bytemuck::{Pod, Zeroable};
use quarry_world::{AIR, BlockId, Face, SECTION_SIZE, SectionBlocks, SectionSnapshot};

/// A single mesh vertex in section-local block units.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    /// Block id the face belongs to; the renderer maps it to a material.
    pub block: u32,
    /// [`Face::index`] of the face this vertex belongs to.
    pub face: u32,
}

/// CPU-side mesh for one section, ready for upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SectionMesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl SectionMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn quad_count(&self) -> usize {
        self.indices.len() / 6
    }

    /// Raw vertex bytes for a GPU buffer upload.
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    fn push_quad(&mut self, corners: [[f32; 3]; 4], block: BlockId, face: Face) {
        let base = self.vertices.len() as u32;
        for position in corners {
            self.vertices.push(MeshVertex {
                position,
                block: u32::from(block.0),
                face: face.index() as u32,
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// Why a build produced no mesh. The section is re-marked dirty and retried.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The mesher panicked; the worker caught it and kept running.
    #[error("mesher panicked")]
    Panicked,

    /// The mesher declined to build, e.g. because it needs neighbour data
    /// that is not loaded yet.
    #[error("mesher failed: {0}")]
    Mesher(String),
}

/// Turns a section snapshot into a mesh. Runs on worker threads.
pub trait SectionMesher: Send + Sync {
    fn build(&self, snapshot: &SectionSnapshot) -> Result<SectionMesh, BuildError>;
}

impl<F> SectionMesher for F
where
    F: Fn(&SectionSnapshot) -> Result<SectionMesh, BuildError> + Send + Sync,
{
    fn build(&self, snapshot: &SectionSnapshot) -> Result<SectionMesh, BuildError> {
        self(snapshot)
    }
}

/// Emits one quad for every solid block face that touches air.
///
/// Faces on the section border look into the neighbour snapshot; an unloaded
/// neighbour counts as air, so border faces are kept until the neighbour
/// arrives and re-dirties this section.
#[derive(Clone, Copy, Debug, Default)]
pub struct CulledMesher;

impl SectionMesher for CulledMesher {
    fn build(&self, snapshot: &SectionSnapshot) -> Result<SectionMesh, BuildError> {
        let mut mesh = SectionMesh::new();
        let size = SECTION_SIZE as usize;
        let blocks = snapshot.blocks.as_ref();

        for y in 0..size {
            for z in 0..size {
                for x in 0..size {
                    let block = blocks.get(x, y, z);
                    if block.is_air() {
                        continue;
                    }
                    for face in Face::ALL {
                        let (dx, dy, dz) = face.offset();
                        let neighbor = block_at(
                            snapshot,
                            x as i32 + dx,
                            y as i32 + dy,
                            z as i32 + dz,
                        );
                        if neighbor.is_air() {
                            mesh.push_quad(face_corners(face, x, y, z), block, face);
                        }
                    }
                }
            }
        }
        Ok(mesh)
    }
}

/// Block lookup one step outside the section falls through to the neighbour
/// snapshot on that side.
fn block_at(snapshot: &SectionSnapshot, x: i32, y: i32, z: i32) -> BlockId {
    let inside = |v: i32| (0..SECTION_SIZE).contains(&v);
    let wrap = |v: i32| v.rem_euclid(SECTION_SIZE) as usize;

    if inside(x) && inside(y) && inside(z) {
        return snapshot.blocks.get(x as usize, y as usize, z as usize);
    }

    let face = if x < 0 {
        Face::NegX
    } else if x >= SECTION_SIZE {
        Face::PosX
    } else if y < 0 {
        Face::NegY
    } else if y >= SECTION_SIZE {
        Face::PosY
    } else if z < 0 {
        Face::NegZ
    } else {
        Face::PosZ
    };

    snapshot
        .neighbor(face)
        .map(|n: &SectionBlocks| n.get(wrap(x), wrap(y), wrap(z)))
        .unwrap_or(AIR)
}

fn face_corners(face: Face, x: usize, y: usize, z: usize) -> [[f32; 3]; 4] {
    let unit: [[f32; 3]; 4] = match face {
        Face::NegX => [[0., 0., 0.], [0., 0., 1.], [0., 1., 1.], [0., 1., 0.]],
        Face::PosX => [[1., 0., 1.], [1., 0., 0.], [1., 1., 0.], [1., 1., 1.]],
        Face::NegY => [[0., 0., 1.], [0., 0., 0.], [1., 0., 0.], [1., 0., 1.]],
        Face::PosY => [[0., 1., 0.], [0., 1., 1.], [1., 1., 1.], [1., 1., 0.]],
        Face::NegZ => [[1., 0., 0.], [0., 0., 0.], [0., 1., 0.], [1., 1., 0.]],
        Face::PosZ => [[0., 0., 1.], [1., 0., 1.], [1., 1., 1.], [0., 1., 1.]],
    };
    let (fx, fy, fz) = (x as f32, y as f32, z as f32);
    unit.map(|[cx, cy, cz]| [fx + cx, fy + cy, fz + cz])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quarry_world::BuildPosition;

    use super::*;

    const STONE: BlockId = BlockId(1);

    fn snapshot_with(blocks: SectionBlocks) -> SectionSnapshot {
        SectionSnapshot::isolated(BuildPosition::new(0, 0, 0), Arc::new(blocks))
    }

    #[test]
    fn test_empty_section_produces_empty_mesh() {
        let mesh = CulledMesher.build(&snapshot_with(SectionBlocks::new())).unwrap();
        assert!(mesh.is_empty());
        assert!(mesh.vertices.is_empty());
    }

    #[test]
    fn test_single_block_has_six_faces() {
        let mut blocks = SectionBlocks::new();
        blocks.set(4, 4, 4, STONE);
        let mesh = CulledMesher.build(&snapshot_with(blocks)).unwrap();
        assert_eq!(mesh.quad_count(), 6);
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
    }

    #[test]
    fn test_adjacent_blocks_cull_shared_face() {
        let mut blocks = SectionBlocks::new();
        blocks.set(4, 4, 4, STONE);
        blocks.set(5, 4, 4, STONE);
        let mesh = CulledMesher.build(&snapshot_with(blocks)).unwrap();
        assert_eq!(mesh.quad_count(), 10);
    }

    #[test]
    fn test_border_face_culled_by_neighbor_snapshot() {
        let mut blocks = SectionBlocks::new();
        blocks.set(15, 0, 0, STONE);
        let mut snap = snapshot_with(blocks);
        assert_eq!(CulledMesher.build(&snap).unwrap().quad_count(), 6);

        snap.neighbors[Face::PosX.index()] = Some(Arc::new(SectionBlocks::filled(STONE)));
        assert_eq!(CulledMesher.build(&snap).unwrap().quad_count(), 5);
    }

    #[test]
    fn test_solid_section_only_meshes_outer_shell() {
        let mesh = CulledMesher
            .build(&snapshot_with(SectionBlocks::filled(STONE)))
            .unwrap();
        assert_eq!(mesh.quad_count(), 6 * 16 * 16);
    }

    #[test]
    fn test_vertices_carry_block_and_face() {
        let mut blocks = SectionBlocks::new();
        blocks.set(0, 0, 0, BlockId(7));
        let mesh = CulledMesher.build(&snapshot_with(blocks)).unwrap();
        assert!(mesh.vertices.iter().all(|v| v.block == 7));
        assert!(mesh.vertices.iter().all(|v| v.face < 6));
        assert_eq!(mesh.vertex_bytes().len(), 24 * std::mem::size_of::<MeshVertex>());
    }

    #[test]
    fn test_closure_mesher() {
        let mesher = |_: &SectionSnapshot| -> Result<SectionMesh, BuildError> {
            Err(BuildError::Mesher("neighbors missing".into()))
        };
        let err = mesher.build(&snapshot_with(SectionBlocks::new())).unwrap_err();
        assert_eq!(err.to_string(), "mesher failed: neighbors missing");
    }
}
