use std::path::PathBuf;

use crate::aggregate::{FeatureSummary, Realigned};
use crate::error::{Error, Result};
use crate::parameters::ParameterSet;
use crate::persistence::{PersistenceGateway, StoredField, WellKey};
use crate::raster::{BackgroundMethod, RasterStack};

/// Well name from zero-based grid position, e.g. `(0, 0)` is `A01`.
pub fn well_name(row: usize, col: usize) -> String {
    format!("{}{:02}", (b'A' + row as u8) as char, col + 1)
}

/// One acquisition site in a well.
#[derive(Debug, Clone)]
pub struct Field {
    index: usize,
    channel_paths: Vec<PathBuf>,
    channel_names: Vec<String>,
    raster: Option<RasterStack>,
    cells: Option<StoredField>,
}

impl Field {
    pub fn new(index: usize, channel_paths: Vec<PathBuf>, channel_names: Vec<String>) -> Self {
        Self {
            index,
            channel_paths,
            channel_names,
            raster: None,
            cells: None,
        }
    }

    /// Field backed by an in-memory raster instead of image files.
    pub fn from_raster(index: usize, raster: RasterStack) -> Self {
        Self {
            index,
            channel_paths: Vec::new(),
            channel_names: raster.channel_names().to_vec(),
            raster: Some(raster),
            cells: None,
        }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn channel_paths(&self) -> &[PathBuf] {
        &self.channel_paths
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn has_images(&self) -> bool {
        !self.channel_paths.is_empty() || self.raster.is_some()
    }

    pub fn raster(&self) -> Option<&RasterStack> {
        self.raster.as_ref()
    }

    /// Returns the resident raster, decoding the channel files if needed.
    pub fn load_raster(&mut self, method: BackgroundMethod) -> Result<&RasterStack> {
        let resident = self.raster.as_ref().is_some_and(|r| !r.is_released());
        if !resident {
            let raster = RasterStack::load_with(&self.channel_paths, &self.channel_names, method)?;
            self.raster = Some(raster);
        }
        self.raster
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter(format!("field {} has no raster", self.index)))
    }

    /// Frees pixel buffers; cells are kept.
    pub fn release_raster(&mut self) {
        if let Some(raster) = &mut self.raster {
            raster.release();
        }
    }

    pub fn cells(&self) -> Option<&StoredField> {
        self.cells.as_ref()
    }

    pub fn set_cells(&mut self, cells: StoredField) {
        self.cells = Some(cells);
    }

    pub fn clear_cells(&mut self) {
        self.cells = None;
    }
}

/// One well of a plate.
#[derive(Debug, Clone)]
pub struct Well {
    name: String,
    row: usize,
    col: usize,
    key: WellKey,
    pub selected: bool,
    fields: Vec<Field>,
    parameters: ParameterSet,
    summary: Option<FeatureSummary>,
    cells_modified: bool,
}

impl Well {
    pub(crate) fn new(plate_index: usize, rows: usize, row: usize, col: usize) -> Self {
        Self {
            name: well_name(row, col),
            row,
            col,
            key: WellKey::new(plate_index, rows * col + row),
            selected: false,
            fields: Vec::new(),
            parameters: ParameterSet::default(),
            summary: None,
            cells_modified: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn col(&self) -> usize {
        self.col
    }

    /// Store key: plate index and column-major well index.
    pub fn key(&self) -> WellKey {
        self.key
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [Field] {
        &mut self.fields
    }

    pub fn add_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn has_images(&self) -> bool {
        self.fields.iter().any(Field::has_images)
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Replaces the parameter set; an invalid set leaves the current one in place.
    pub fn set_parameters(&mut self, mut parameters: ParameterSet) -> Result<()> {
        parameters.validate()?;
        parameters.modified = true;
        self.parameters = parameters;
        Ok(())
    }

    pub fn summary(&self) -> Option<&FeatureSummary> {
        self.summary.as_ref()
    }

    pub fn set_summary(&mut self, summary: FeatureSummary) {
        self.summary = Some(summary);
    }

    pub fn clear_summary(&mut self) {
        self.summary = None;
    }

    pub fn cells_modified(&self) -> bool {
        self.cells_modified
    }

    pub fn set_cells_modified(&mut self, modified: bool) {
        self.cells_modified = modified;
    }

    pub fn cell_count(&self) -> usize {
        self.fields
            .iter()
            .filter_map(|f| f.cells())
            .map(|c| c.cells.len())
            .sum()
    }

    /// Drops per-cell data and pixel buffers of all fields. The summary stays.
    pub fn clear_cell_data(&mut self) {
        for field in &mut self.fields {
            field.clear_cells();
            field.release_raster();
        }
    }

    /// Replaces the summary with stored means and stdevs realigned to
    /// `feature_names`. Leaves the current summary untouched and returns
    /// `Ok(None)` when anything is missing from the store.
    pub fn load_summary(
        &mut self,
        gateway: &dyn PersistenceGateway,
        feature_names: &[String],
    ) -> Result<Option<Realigned>> {
        let (Some(stored_names), Some(means), Some(stdevs)) = (
            gateway.read_mean_feature_names(self.key.plate_index)?,
            gateway.read_well_means(self.key)?,
            gateway.read_well_stdevs(self.key)?,
        ) else {
            return Ok(None);
        };

        let stored = FeatureSummary::from_vectors(stored_names, &means, &stdevs)?;
        let realigned = stored.realign(feature_names);
        if !realigned.is_exact() {
            tracing::warn!(
                well = %self.name,
                missing = ?realigned.missing,
                unexpected = ?realigned.unexpected,
                "Stored feature set differs from the current one"
            );
        }
        self.summary = Some(realigned.summary.clone());
        Ok(Some(realigned))
    }

    /// Writes the summary (means, stdevs and plate feature names).
    pub fn save_summary(&self, gateway: &dyn PersistenceGateway) -> Result<bool> {
        let Some(summary) = &self.summary else {
            return Ok(false);
        };
        gateway.write_well_means(self.key, &summary.means())?;
        gateway.write_well_stdevs(self.key, &summary.stdevs())?;
        gateway.write_mean_feature_names(self.key.plate_index, summary.names())?;
        Ok(true)
    }
}
