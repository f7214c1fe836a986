//! Client-side world storage: regions, sections, and the per-section
//! rebuild state machine driven by the frame scheduler.

pub mod position;
pub mod region;
pub mod section;
pub mod state;
pub mod world;

pub use position::{BuildPosition, Face, RegionPos, SECTION_SIZE, block_to_section};
pub use region::Region;
pub use section::{AIR, BlockId, SECTION_VOLUME, Section, SectionBlocks, SectionSnapshot};
pub use state::SectionState;
pub use world::World;
