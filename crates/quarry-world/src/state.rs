//! Per-section rebuild state.
//!
//! A section's mesh can be stale (`dirty`) and can have a rebuild in flight
//! (`building`) at the same time. Keeping both facts in one enum rules out a
//! second concurrent build, and a change that lands while a build is running
//! survives that build's completion instead of being absorbed by it.

/// Rebuild state of one section.
///
/// | From            | Event          | To              |
/// |-----------------|----------------|-----------------|
/// | `Clean`         | `mark_dirty`   | `Dirty`         |
/// | `Dirty`         | `begin_build`  | `Building`      |
/// | `Building`      | `mark_dirty`   | `BuildingDirty` |
/// | `Building`      | `finish_build` | `Clean`         |
/// | `BuildingDirty` | `finish_build` | `Dirty`         |
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SectionState {
    /// Mesh is current, nothing in flight.
    #[default]
    Clean,
    /// Content changed since the last successful build.
    Dirty,
    /// A build is in flight and no change has arrived since it started.
    Building,
    /// A build is in flight and the content changed after it started.
    BuildingDirty,
}

impl SectionState {
    /// Record a change to the section's renderable content.
    pub fn mark_dirty(&mut self) {
        *self = match *self {
            SectionState::Clean | SectionState::Dirty => SectionState::Dirty,
            SectionState::Building | SectionState::BuildingDirty => SectionState::BuildingDirty,
        };
    }

    /// Transition `Dirty -> Building`. Returns `false` and leaves the state
    /// untouched from any other state.
    pub fn begin_build(&mut self) -> bool {
        if *self == SectionState::Dirty {
            *self = SectionState::Building;
            true
        } else {
            false
        }
    }

    /// Clear the in-flight marker after a completion. A change that arrived
    /// during the build leaves the section `Dirty`.
    ///
    /// Returns `false` if no build was in flight.
    pub fn finish_build(&mut self) -> bool {
        match *self {
            SectionState::Building => {
                *self = SectionState::Clean;
                true
            }
            SectionState::BuildingDirty => {
                *self = SectionState::Dirty;
                true
            }
            SectionState::Clean | SectionState::Dirty => false,
        }
    }

    /// `dirty && !building`: eligible for dispatch.
    pub fn needs_build(self) -> bool {
        self == SectionState::Dirty
    }

    pub fn is_dirty(self) -> bool {
        matches!(self, SectionState::Dirty | SectionState::BuildingDirty)
    }

    pub fn is_building(self) -> bool {
        matches!(self, SectionState::Building | SectionState::BuildingDirty)
    }
}
