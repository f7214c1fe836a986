//! Section meshing and the background build pool.
//!
//! The scheduler snapshots dirty sections into [`BuildJob`]s, hands them to a
//! [`BuildPool`], and receives exactly one [`BuildCompletion`] per job back on
//! a channel. [`BuilderBudget`] caps how many builds are in flight.

pub mod budget;
pub mod mesher;
pub mod pool;
pub mod store;

pub use budget::BuilderBudget;
pub use mesher::{BuildError, CulledMesher, MeshVertex, SectionMesh, SectionMesher};
pub use pool::{BuildCompletion, BuildJob, BuildOutcome, BuildPool, CompletionSender};
pub use store::MeshStore;
