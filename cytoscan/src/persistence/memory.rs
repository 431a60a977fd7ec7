use hashbrown::HashMap;
use parking_lot::RwLock;

use super::{PersistenceGateway, StoredField, WellKey};
use crate::error::Result;

/// In-process store, mostly for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    means: RwLock<HashMap<WellKey, Vec<f32>>>,
    stdevs: RwLock<HashMap<WellKey, Vec<f32>>>,
    names: RwLock<HashMap<usize, Vec<String>>>,
    fields: RwLock<HashMap<(WellKey, usize), StoredField>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored field cell lists.
    pub fn field_count(&self) -> usize {
        self.fields.read().len()
    }
}

impl PersistenceGateway for MemoryStore {
    fn write_well_means(&self, key: WellKey, means: &[f32]) -> Result<()> {
        self.means.write().insert(key, means.to_vec());
        Ok(())
    }

    fn read_well_means(&self, key: WellKey) -> Result<Option<Vec<f32>>> {
        Ok(self.means.read().get(&key).cloned())
    }

    fn write_well_stdevs(&self, key: WellKey, stdevs: &[f32]) -> Result<()> {
        self.stdevs.write().insert(key, stdevs.to_vec());
        Ok(())
    }

    fn read_well_stdevs(&self, key: WellKey) -> Result<Option<Vec<f32>>> {
        Ok(self.stdevs.read().get(&key).cloned())
    }

    fn write_mean_feature_names(&self, plate_index: usize, names: &[String]) -> Result<()> {
        self.names.write().insert(plate_index, names.to_vec());
        Ok(())
    }

    fn read_mean_feature_names(&self, plate_index: usize) -> Result<Option<Vec<String>>> {
        Ok(self.names.read().get(&plate_index).cloned())
    }

    fn write_field_cells(&self, key: WellKey, field: usize, data: &StoredField) -> Result<()> {
        self.fields.write().insert((key, field), data.clone());
        Ok(())
    }

    fn read_field_cells(&self, key: WellKey, field: usize) -> Result<Option<StoredField>> {
        Ok(self.fields.read().get(&(key, field)).cloned())
    }

    fn clear_well(&self, key: WellKey) -> Result<()> {
        self.means.write().remove(&key);
        self.stdevs.write().remove(&key);
        self.fields.write().retain(|(k, _), _| *k != key);
        Ok(())
    }
}
