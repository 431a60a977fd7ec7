//! Cells and their named pixel compartments.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const NUCLEUS: &str = "Nucleus";
pub const WHOLE_CELL: &str = "WholeCell";
pub const CYTOPLASM: &str = "Cytoplasm";
pub const BOUNDING_BOX: &str = "BoundingBox";

/// Pixel coordinate in a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    #[inline]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// A named set of pixel coordinates belonging to one cell.
///
/// The pixel count survives [`CellCompartment::release_coordinates`], so size
/// features stay available after the coordinate array is dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellCompartment {
    name: String,
    coordinates: Option<Vec<Point>>,
    pixel_count: usize,
}

impl CellCompartment {
    pub fn new(name: impl Into<String>, coordinates: Vec<Point>) -> Self {
        let pixel_count = coordinates.len();
        Self {
            name: name.into(),
            coordinates: Some(coordinates),
            pixel_count,
        }
    }

    /// Two-point compartment spanning the min and max corners of `points`.
    pub fn bounding_box(points: &[Point]) -> Self {
        let mut min = Point::new(u32::MAX, u32::MAX);
        let mut max = Point::new(0, 0);
        for p in points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        let corners = if points.is_empty() {
            Vec::new()
        } else {
            vec![min, max]
        };
        Self::new(BOUNDING_BOX, corners)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Coordinates, `None` once released.
    pub fn coordinates(&self) -> Option<&[Point]> {
        self.coordinates.as_deref()
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.pixel_count
    }

    pub fn release_coordinates(&mut self) {
        self.coordinates = None;
    }

    pub fn is_released(&self) -> bool {
        self.coordinates.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(pub u32);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One segmented cell: an id and its compartments keyed by name.
///
/// `Clone` is a deep copy; mutating a clone never affects the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    id: CellId,
    compartments: BTreeMap<String, CellCompartment>,
}

impl Cell {
    pub fn new(id: CellId) -> Self {
        Self {
            id,
            compartments: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Adds or replaces the compartment with the same name.
    pub fn insert(&mut self, compartment: CellCompartment) {
        self.compartments.insert(compartment.name.clone(), compartment);
    }

    pub fn compartment(&self, name: &str) -> Option<&CellCompartment> {
        self.compartments.get(name)
    }

    pub fn compartments(&self) -> impl Iterator<Item = &CellCompartment> {
        self.compartments.values()
    }

    pub fn compartment_names(&self) -> impl Iterator<Item = &str> {
        self.compartments.keys().map(String::as_str)
    }

    /// Pixel count of a compartment, 0 when absent.
    pub fn pixel_count(&self, name: &str) -> usize {
        self.compartment(name).map_or(0, CellCompartment::pixel_count)
    }

    /// Frees every compartment's coordinates, keeping names and counts.
    pub fn release_coordinates(&mut self) {
        for compartment in self.compartments.values_mut() {
            compartment.release_coordinates();
        }
    }
}

/// Groups extracted compartments into cells with sequential ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct CellAssembler {
    start_id: u32,
}

impl CellAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_id(start_id: u32) -> Self {
        Self { start_id }
    }

    /// Ids follow input order starting at the configured start id.
    /// Compartment disjointness is taken from the extractor as-is.
    pub fn assemble(&self, compartment_sets: Vec<Vec<CellCompartment>>) -> Vec<Cell> {
        compartment_sets
            .into_iter()
            .zip(self.start_id..)
            .map(|(set, id)| {
                let mut cell = Cell::new(CellId(id));
                for compartment in set {
                    cell.insert(compartment);
                }
                cell
            })
            .collect()
    }
}
