//! Region, section, and block coordinates.

/// Edge length of a section in blocks. Regions are `SECTION_SIZE` wide on X/Z.
pub const SECTION_SIZE: i32 = 16;

/// Column coordinate of a region (chunk) in region units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RegionPos {
    /// Region-grid X coordinate.
    pub x: i32,
    /// Region-grid Z coordinate.
    pub z: i32,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Returns the region offset by `(dx, dz)`.
    pub fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            z: self.z + dz,
        }
    }

    /// Squared distance in region units. Saturates instead of overflowing.
    pub fn distance_squared(self, other: RegionPos) -> u64 {
        let dx = (i64::from(self.x) - i64::from(other.x)).unsigned_abs();
        let dz = (i64::from(self.z) - i64::from(other.z)).unsigned_abs();
        (dx * dx).saturating_add(dz * dz)
    }
}

/// Identifies one section: the owning region plus the section's Y index.
///
/// Travels with a build job to the worker and back on completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildPosition {
    pub region: RegionPos,
    pub y: i32,
}

impl BuildPosition {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self {
            region: RegionPos::new(x, z),
            y,
        }
    }

    /// The section adjacent across `face`.
    pub fn neighbor(self, face: Face) -> Self {
        let (dx, dy, dz) = face.offset();
        Self {
            region: self.region.offset(dx, dz),
            y: self.y + dy,
        }
    }
}

/// The six axis-aligned faces of a section or block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    NegX,
    PosX,
    NegY,
    PosY,
    NegZ,
    PosZ,
}

impl Face {
    /// All faces in index order.
    pub const ALL: [Face; 6] = [
        Face::NegX,
        Face::PosX,
        Face::NegY,
        Face::PosY,
        Face::NegZ,
        Face::PosZ,
    ];

    /// Unit offset `(dx, dy, dz)` pointing out of this face.
    pub fn offset(self) -> (i32, i32, i32) {
        match self {
            Face::NegX => (-1, 0, 0),
            Face::PosX => (1, 0, 0),
            Face::NegY => (0, -1, 0),
            Face::PosY => (0, 1, 0),
            Face::NegZ => (0, 0, -1),
            Face::PosZ => (0, 0, 1),
        }
    }

    /// Index into [`Face::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Split a world block coordinate into its section position and the local
/// `(x, y, z)` offset inside that section.
pub fn block_to_section(x: i32, y: i32, z: i32) -> (BuildPosition, (usize, usize, usize)) {
    let pos = BuildPosition::new(
        x.div_euclid(SECTION_SIZE),
        y.div_euclid(SECTION_SIZE),
        z.div_euclid(SECTION_SIZE),
    );
    let local = (
        x.rem_euclid(SECTION_SIZE) as usize,
        y.rem_euclid(SECTION_SIZE) as usize,
        z.rem_euclid(SECTION_SIZE) as usize,
    );
    (pos, local)
}
