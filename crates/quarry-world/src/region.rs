//! A region (chunk column): an ordered stack of sections.

use std::collections::BTreeMap;

use crate::position::RegionPos;
use crate::section::Section;

/// A loaded region and its sections, keyed by section Y.
///
/// Sections iterate bottom to top, which gives the build scan a stable
/// order inside each region.
#[derive(Clone, Debug)]
pub struct Region {
    pos: RegionPos,
    sections: BTreeMap<i32, Section>,
}

impl Region {
    pub fn new(pos: RegionPos) -> Self {
        Self {
            pos,
            sections: BTreeMap::new(),
        }
    }

    pub fn pos(&self) -> RegionPos {
        self.pos
    }

    pub fn section(&self, y: i32) -> Option<&Section> {
        self.sections.get(&y)
    }

    pub fn section_mut(&mut self, y: i32) -> Option<&mut Section> {
        self.sections.get_mut(&y)
    }

    /// Returns the section at `y`, creating an empty clean one if absent.
    pub fn section_or_insert(&mut self, y: i32) -> &mut Section {
        self.sections.entry(y).or_default()
    }

    /// Insert or replace the section at `y`, returning the previous one.
    pub fn insert_section(&mut self, y: i32, section: Section) -> Option<Section> {
        self.sections.insert(y, section)
    }

    /// Sections in ascending Y order.
    pub fn sections(&self) -> impl Iterator<Item = (i32, &Section)> {
        self.sections.iter().map(|(y, s)| (*y, s))
    }

    pub fn sections_mut(&mut self) -> impl Iterator<Item = (i32, &mut Section)> {
        self.sections.iter_mut().map(|(y, s)| (*y, s))
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    /// Number of sections with a build in flight.
    pub fn building_count(&self) -> usize {
        self.sections
            .values()
            .filter(|s| s.state().is_building())
            .count()
    }
}
