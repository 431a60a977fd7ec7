//! Plate → Well → Field model.

mod well;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::aggregate::FeatureStats;
use crate::batch::CheckoutRegistry;
use crate::error::{Error, Result};
use crate::persistence::{PersistenceGateway, WellKey};

pub use well::{Field, Well, well_name};

/// Well shared between the caller and background workers.
pub type SharedWell = Arc<Mutex<Well>>;

/// Traversal order for well listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WellOrder {
    /// Row by row: A01, A02, ..., B01.
    #[default]
    Horizontal,
    /// Column by column: A01, B01, ..., A02.
    Vertical,
}

/// Which per-well statistic a range query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Mean,
    /// Coefficient of variation.
    Cv,
}

impl StatKind {
    fn value(self, stats: FeatureStats) -> f32 {
        match self {
            StatKind::Mean => stats.mean,
            StatKind::Cv => stats.cv(),
        }
    }
}

/// Grid of wells with a fixed geometry.
#[derive(Debug, Clone)]
pub struct Plate {
    id: usize,
    pub title: Option<String>,
    rows: usize,
    cols: usize,
    /// Row-major.
    wells: Vec<SharedWell>,
}

impl Plate {
    pub const MAX_ROWS: usize = 26;

    /// `id` is 1-based; rows are limited to the letters A to Z.
    pub fn new(id: usize, rows: usize, cols: usize) -> Result<Self> {
        if id == 0 {
            return Err(Error::InvalidParameter("plate id starts at 1".into()));
        }
        if rows == 0 || rows > Self::MAX_ROWS {
            return Err(Error::InvalidParameter(format!(
                "plate rows must be within 1..={}, got {rows}",
                Self::MAX_ROWS
            )));
        }
        if cols == 0 {
            return Err(Error::InvalidParameter("plate needs at least one column".into()));
        }

        let plate_index = id - 1;
        let wells = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| (row, col)))
            .map(|(row, col)| Arc::new(Mutex::new(Well::new(plate_index, rows, row, col))))
            .collect();

        Ok(Self {
            id,
            title: None,
            rows,
            cols,
            wells,
        })
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Zero-based index used as the store key.
    pub fn plate_index(&self) -> usize {
        self.id - 1
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    fn key_at(&self, row: usize, col: usize) -> WellKey {
        WellKey::new(self.plate_index(), self.rows * col + row)
    }

    pub fn well(&self, row: usize, col: usize) -> Option<&SharedWell> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.wells.get(row * self.cols + col)
    }

    pub fn well_by_name(&self, name: &str) -> Option<&SharedWell> {
        let mut chars = name.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        if !letter.is_ascii_uppercase() {
            return None;
        }
        let col: usize = chars.as_str().parse().ok()?;
        let row = (letter as u8 - b'A') as usize;
        self.well(row, col.checked_sub(1)?)
    }

    /// All wells, row-major.
    pub fn wells(&self) -> &[SharedWell] {
        &self.wells
    }

    pub fn well_names(&self) -> Vec<String> {
        self.wells.iter().map(|w| w.lock().name().to_string()).collect()
    }

    fn ordered(&self, order: WellOrder) -> Vec<&SharedWell> {
        match order {
            WellOrder::Horizontal => self.wells.iter().collect(),
            WellOrder::Vertical => (0..self.cols)
                .flat_map(|col| (0..self.rows).map(move |row| row * self.cols + col))
                .map(|i| &self.wells[i])
                .collect(),
        }
    }

    pub fn selected_wells(&self, order: WellOrder) -> Vec<SharedWell> {
        self.ordered(order)
            .into_iter()
            .filter(|w| w.lock().selected)
            .cloned()
            .collect()
    }

    pub fn wells_with_images(&self) -> Vec<SharedWell> {
        self.wells
            .iter()
            .filter(|w| w.lock().has_images())
            .cloned()
            .collect()
    }

    /// Independent copy; wells are no longer shared with `self`.
    pub fn deep_copy(&self) -> Self {
        Self {
            id: self.id,
            title: self.title.clone(),
            rows: self.rows,
            cols: self.cols,
            wells: self
                .wells
                .iter()
                .map(|w| Arc::new(Mutex::new(w.lock().clone())))
                .collect(),
        }
    }

    pub fn max_number_of_fields(&self) -> usize {
        self.wells
            .iter()
            .map(|w| w.lock().fields().len())
            .max()
            .unwrap_or(0)
    }

    /// Clears cell data of every well not owned by a running batch or loader.
    /// Returns the number of wells cleared.
    pub fn clear_cell_data(&self, checkouts: &CheckoutRegistry) -> usize {
        let mut cleared = 0;
        for (i, well) in self.wells.iter().enumerate() {
            // Checked before locking: a worker holds the lock while it runs.
            // The registry stays locked until the clear is done, so no run
            // can check the well out in between.
            let key = self.key_at(i / self.cols, i % self.cols);
            match checkouts.run_if_free(key, || well.lock().clear_cell_data()) {
                Some(()) => cleared += 1,
                None => tracing::debug!(%key, "Skipping clear of checked-out well"),
            }
        }
        cleared
    }

    /// Min and max of `feature` over the selected wells of all `plates` that
    /// have a summary. `None` when no well carries the feature.
    pub fn feature_range(plates: &[Plate], feature: &str, kind: StatKind) -> Option<(f32, f32)> {
        let mut range: Option<(f32, f32)> = None;
        for plate in plates {
            for well in &plate.wells {
                let well = well.lock();
                if !well.selected {
                    continue;
                }
                let Some(stats) = well.summary().and_then(|s| s.get(feature)) else {
                    continue;
                };
                let value = kind.value(stats);
                if !value.is_finite() {
                    continue;
                }
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(value), hi.max(value)),
                    None => (value, value),
                });
            }
        }
        range
    }

    /// Loads stored means and stdevs into every well. Returns the number of
    /// wells that had stored data.
    pub fn load_summaries(
        &self,
        gateway: &dyn PersistenceGateway,
        feature_names: &[String],
    ) -> Result<usize> {
        let mut loaded = 0;
        for well in &self.wells {
            if well.lock().load_summary(gateway, feature_names)?.is_some() {
                loaded += 1;
            }
        }
        tracing::debug!(plate = self.id, loaded, "Loaded stored well summaries");
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::FeatureSummary;
    use crate::persistence::MemoryStore;

    fn summary(mean: f32, stdev: f32) -> FeatureSummary {
        FeatureSummary::from_vectors(vec!["Size_nucleus".into()], &[mean], &[stdev]).unwrap()
    }

    #[test]
    fn test_geometry_and_names() {
        let plate = Plate::new(1, 8, 12).unwrap();
        assert_eq!(plate.wells().len(), 96);
        assert_eq!(plate.plate_index(), 0);

        let names = plate.well_names();
        assert_eq!(names[0], "A01");
        assert_eq!(names[11], "A12");
        assert_eq!(names[12], "B01");
        assert_eq!(names[95], "H12");
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        assert!(Plate::new(0, 8, 12).is_err());
        assert!(Plate::new(1, 0, 12).is_err());
        assert!(Plate::new(1, 27, 12).is_err());
        assert!(Plate::new(1, 8, 0).is_err());
        assert!(Plate::new(1, 26, 1).is_ok());
    }

    #[test]
    fn test_well_key_is_column_major() {
        let plate = Plate::new(3, 8, 12).unwrap();
        let well = plate.well(2, 5).unwrap().lock();
        assert_eq!(well.name(), "C06");
        assert_eq!(well.key(), WellKey::new(2, 8 * 5 + 2));
    }

    #[test]
    fn test_well_by_name() {
        let plate = Plate::new(1, 8, 12).unwrap();
        assert_eq!(plate.well_by_name("B03").unwrap().lock().name(), "B03");
        assert_eq!(plate.well_by_name("h12").unwrap().lock().name(), "H12");
        assert!(plate.well_by_name("I01").is_none());
        assert!(plate.well_by_name("A13").is_none());
        assert!(plate.well_by_name("A00").is_none());
        assert!(plate.well_by_name("").is_none());
        assert!(plate.well_by_name("1A").is_none());
    }

    #[test]
    fn test_selected_wells_order() {
        let plate = Plate::new(1, 2, 2).unwrap();
        for w in plate.wells() {
            w.lock().selected = true;
        }
        let names = |order| {
            plate
                .selected_wells(order)
                .iter()
                .map(|w| w.lock().name().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(names(WellOrder::Horizontal), ["A01", "A02", "B01", "B02"]);
        assert_eq!(names(WellOrder::Vertical), ["A01", "B01", "A02", "B02"]);

        plate.well(0, 1).unwrap().lock().selected = false;
        assert_eq!(names(WellOrder::Vertical), ["A01", "B01", "B02"]);
    }

    #[test]
    fn test_wells_with_images_and_max_fields() {
        let plate = Plate::new(1, 2, 2).unwrap();
        assert!(plate.wells_with_images().is_empty());
        assert_eq!(plate.max_number_of_fields(), 0);

        {
            let mut well = plate.well(1, 0).unwrap().lock();
            well.add_field(Field::new(0, vec!["a.tif".into()], vec!["DAPI".into()]));
            well.add_field(Field::new(1, vec!["b.tif".into()], vec!["DAPI".into()]));
        }
        plate.well(0, 0).unwrap().lock().add_field(Field::new(0, vec![], vec![]));

        let with_images = plate.wells_with_images();
        assert_eq!(with_images.len(), 1);
        assert_eq!(with_images[0].lock().name(), "B01");
        assert_eq!(plate.max_number_of_fields(), 2);
    }

    #[test]
    fn test_deep_copy_is_independent() {
        let plate = Plate::new(1, 1, 2).unwrap().with_title("screen");
        plate.well(0, 0).unwrap().lock().selected = true;

        let copy = plate.deep_copy();
        copy.well(0, 0).unwrap().lock().selected = false;

        assert!(plate.well(0, 0).unwrap().lock().selected);
        assert_eq!(copy.title.as_deref(), Some("screen"));
    }

    #[test]
    fn test_clear_skips_checked_out_wells() {
        let plate = Plate::new(1, 1, 2).unwrap();
        for w in plate.wells() {
            let mut w = w.lock();
            w.add_field(Field::new(0, vec!["x.tif".into()], vec!["DAPI".into()]));
            w.fields_mut()[0].set_cells(Default::default());
            w.set_summary(summary(1.0, 0.0));
        }

        let registry = CheckoutRegistry::new();
        let busy = plate.well(0, 1).unwrap().lock().key();
        let _guard = registry.checkout_all(&[(busy, "A02".into())]).unwrap();

        assert_eq!(plate.clear_cell_data(&registry), 1);
        let a01 = plate.well(0, 0).unwrap().lock();
        let a02 = plate.well(0, 1).unwrap().lock();
        assert!(a01.fields()[0].cells().is_none());
        assert!(a01.summary().is_some());
        assert!(a02.fields()[0].cells().is_some());
    }

    #[test]
    fn test_feature_range_over_plates() {
        let first = Plate::new(1, 1, 2).unwrap();
        let second = Plate::new(2, 1, 1).unwrap();

        let set = |plate: &Plate, col, s: FeatureSummary| {
            let mut w = plate.well(0, col).unwrap().lock();
            w.selected = true;
            w.set_summary(s);
        };
        set(&first, 0, summary(10.0, 1.0));
        set(&first, 1, summary(40.0, 2.0));
        set(&second, 0, summary(20.0, 10.0));

        let plates = [first, second];
        assert_eq!(
            Plate::feature_range(&plates, "Size_nucleus", StatKind::Mean),
            Some((10.0, 40.0))
        );
        assert_eq!(
            Plate::feature_range(&plates, "Size_nucleus", StatKind::Cv),
            Some((0.05, 0.5))
        );
        assert_eq!(Plate::feature_range(&plates, "Other", StatKind::Mean), None);

        plates[0].well(0, 1).unwrap().lock().selected = false;
        assert_eq!(
            Plate::feature_range(&plates, "Size_nucleus", StatKind::Mean),
            Some((10.0, 20.0))
        );
    }

    #[test]
    fn test_load_summaries_from_store() {
        let plate = Plate::new(1, 1, 2).unwrap();
        let store = MemoryStore::new();
        let names = vec!["Size_nucleus".to_string(), "Size_whole".to_string()];

        let key = plate.well(0, 1).unwrap().lock().key();
        store.write_mean_feature_names(0, &names).unwrap();
        store.write_well_means(key, &[5.0, 9.0]).unwrap();
        store.write_well_stdevs(key, &[1.0, 2.0]).unwrap();

        assert_eq!(plate.load_summaries(&store, &names).unwrap(), 1);
        assert!(plate.well(0, 0).unwrap().lock().summary().is_none());

        let well = plate.well(0, 1).unwrap().lock();
        let stats = well.summary().unwrap().get("Size_whole").unwrap();
        assert_eq!(stats.mean, 9.0);
        assert_eq!(stats.stdev, 2.0);

        // Loading again leaves the same values.
        drop(well);
        assert_eq!(plate.load_summaries(&store, &names).unwrap(), 1);
        assert_eq!(plate.well(0, 1).unwrap().lock().summary().unwrap().len(), 2);
    }

    #[test]
    fn test_set_parameters_keeps_previous_on_error() {
        let plate = Plate::new(1, 1, 1).unwrap();
        let mut well = plate.well(0, 0).unwrap().lock();

        let mut params = crate::parameters::ParameterSet::default();
        params.threshold_nucleus = 250.0;
        well.set_parameters(params.clone()).unwrap();
        assert!(well.parameters().modified);

        let mut bad = params;
        bad.threshold_cell = -1.0;
        assert!(well.set_parameters(bad).is_err());
        assert_eq!(well.parameters().threshold_nucleus, 250.0);
        assert_eq!(well.parameters().threshold_cell, 100.0);
    }
}
