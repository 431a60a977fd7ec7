//! Reloads stored cells and well statistics on a background thread.

use std::sync::Arc;
use std::thread::JoinHandle;

use super::CheckoutRegistry;
use crate::error::Result;
use crate::features::FeatureEngine;
use crate::persistence::{PersistenceGateway, WellKey};
use crate::plate::{SharedWell, Well};

#[derive(Debug, Clone, PartialEq)]
pub enum LoadStatus {
    /// `missing` and `unexpected` list the differences between the stored
    /// well statistics and the current feature set; both are empty on an
    /// exact match.
    Loaded {
        fields: usize,
        cells: usize,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    /// Nothing stored for this well.
    NotStored,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadReport {
    pub name: String,
    pub key: WellKey,
    pub status: LoadStatus,
}

#[derive(Debug, Clone)]
pub struct CellLoader {
    gateway: Arc<dyn PersistenceGateway>,
    engine: Arc<FeatureEngine>,
    checkouts: CheckoutRegistry,
}

#[derive(Debug)]
pub struct LoaderHandle {
    handle: JoinHandle<Vec<LoadReport>>,
}

impl LoaderHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the loader. A panicked loader yields no reports.
    pub fn join(self) -> Vec<LoadReport> {
        self.handle.join().unwrap_or_default()
    }
}

impl CellLoader {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        engine: Arc<FeatureEngine>,
        checkouts: CheckoutRegistry,
    ) -> Self {
        Self {
            gateway,
            engine,
            checkouts,
        }
    }

    /// Checks out `wells` and loads them on a new thread. Fails with
    /// `WellBusy` when a batch run owns any of them.
    pub fn spawn(&self, wells: Vec<SharedWell>) -> Result<LoaderHandle> {
        let requested: Vec<_> = wells
            .iter()
            .map(|w| {
                let w = w.lock();
                (w.key(), w.name().to_string())
            })
            .collect();
        let guard = self.checkouts.checkout_all(&requested)?;

        let loader = self.clone();
        let handle = std::thread::spawn(move || {
            let _guard = guard;
            wells
                .iter()
                .map(|w| loader.load_well(&mut w.lock()))
                .collect()
        });
        Ok(LoaderHandle { handle })
    }

    /// Loads one well in place. Cells stored with another feature set are
    /// rejected; statistics are realigned to the current feature names and
    /// the difference is returned in the report.
    pub fn load_well(&self, well: &mut Well) -> LoadReport {
        let status = match self.try_load(well) {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(well = %well.name(), "Loading stored cells failed: {e}");
                LoadStatus::Error(e.to_string())
            }
        };
        LoadReport {
            name: well.name().to_string(),
            key: well.key(),
            status,
        }
    }

    fn try_load(&self, well: &mut Well) -> Result<LoadStatus> {
        let key = well.key();
        let mut stored = Vec::new();
        for field in well.fields() {
            if let Some(data) = self.gateway.read_field_cells(key, field.index())? {
                self.engine.check_schema(&data.feature_names)?;
                stored.push((field.index(), data));
            }
        }

        let names = self.engine.feature_names();
        let summary = well.load_summary(self.gateway.as_ref(), &names)?;
        if stored.is_empty() && summary.is_none() {
            return Ok(LoadStatus::NotStored);
        }

        let fields = stored.len();
        for (index, data) in stored {
            if let Some(field) = well.fields_mut().iter_mut().find(|f| f.index() == index) {
                field.set_cells(data);
            }
        }
        well.set_cells_modified(false);

        let cells = well.cell_count();
        tracing::debug!(well = %well.name(), fields, cells, "Loaded stored cells");
        let (missing, unexpected) = summary
            .map(|r| (r.missing, r.unexpected))
            .unwrap_or_default();
        Ok(LoadStatus::Loaded {
            fields,
            cells,
            missing,
            unexpected,
        })
    }
}
