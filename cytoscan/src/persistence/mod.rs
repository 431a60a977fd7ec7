//! Storage of per-well results keyed by plate and well index.

mod memory;
mod project;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::error::Result;

pub use memory::MemoryStore;
pub use project::ProjectStore;

/// Store key of one well: zero-based plate index and column-major well index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WellKey {
    pub plate_index: usize,
    pub well_index: usize,
}

impl WellKey {
    pub const fn new(plate_index: usize, well_index: usize) -> Self {
        Self {
            plate_index,
            well_index,
        }
    }
}

impl fmt::Display for WellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plate {} well {}", self.plate_index, self.well_index)
    }
}

/// Cells of one field with their feature values, self-describing by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredField {
    pub feature_names: Vec<String>,
    pub cells: Vec<Cell>,
    /// One vector per cell, ordered as `feature_names`.
    pub values: Vec<Vec<f32>>,
}

/// Read/write access to stored results.
///
/// Reads of keys that were never written return `Ok(None)`; I/O and decoding
/// failures surface as `Error::Connector`.
pub trait PersistenceGateway: Send + Sync + fmt::Debug {
    fn write_well_means(&self, key: WellKey, means: &[f32]) -> Result<()>;
    fn read_well_means(&self, key: WellKey) -> Result<Option<Vec<f32>>>;

    fn write_well_stdevs(&self, key: WellKey, stdevs: &[f32]) -> Result<()>;
    fn read_well_stdevs(&self, key: WellKey) -> Result<Option<Vec<f32>>>;

    fn write_mean_feature_names(&self, plate_index: usize, names: &[String]) -> Result<()>;
    fn read_mean_feature_names(&self, plate_index: usize) -> Result<Option<Vec<String>>>;

    fn write_field_cells(&self, key: WellKey, field: usize, data: &StoredField) -> Result<()>;
    fn read_field_cells(&self, key: WellKey, field: usize) -> Result<Option<StoredField>>;

    /// Removes the means, stdevs and field cells of one well. Plate-level
    /// feature names are kept.
    fn clear_well(&self, key: WellKey) -> Result<()>;
}

#[cfg(test)]
mod tests;
