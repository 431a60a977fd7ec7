//! Background segmentation of selected wells and reload of cached cells.

mod checkout;
mod loader;


use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::aggregate::WellAggregator;
use crate::cell::{Cell, CellAssembler};
use crate::error::{Error, Result};
use crate::features::FeatureEngine;
use crate::parameters::{ParameterSet, ProcessType};
use crate::persistence::{PersistenceGateway, StoredField, WellKey};
use crate::plate::{SharedWell, Well};
use crate::raster::{BackgroundMethod, RasterStack};
use crate::segmentation::Segmentor;

pub use checkout::{CheckoutGuard, CheckoutRegistry};
pub use loader::{CellLoader, LoadReport, LoadStatus, LoaderHandle};

/// What a batch run keeps and persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Write per-field cells and values to the store.
    pub store_cells: bool,
    /// Free pixel buffers once a field is processed.
    pub release_rasters: bool,
    /// Drop per-field cells from memory once they are aggregated.
    pub release_cells: bool,
    pub background: BackgroundMethod,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            store_cells: true,
            release_rasters: true,
            release_cells: false,
            background: BackgroundMethod::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum BatchState {
    #[default]
    Idle,
    Running,
    Completed,
    /// The run stopped; wells finished before the failure stay valid.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WellStatus {
    Segmented { cells: usize },
    SkippedNoImage,
    /// Processed but produced no cells.
    Unsegmented,
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WellReport {
    pub name: String,
    pub key: WellKey,
    pub status: WellStatus,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub state: BatchState,
    pub wells: Vec<WellReport>,
}

impl BatchReport {
    pub fn status_of(&self, name: &str) -> Option<&WellStatus> {
        self.wells.iter().find(|w| w.name == name).map(|w| &w.status)
    }

    pub fn total_cells(&self) -> usize {
        self.wells
            .iter()
            .map(|w| match w.status {
                WellStatus::Segmented { cells } => cells,
                _ => 0,
            })
            .sum()
    }
}

/// Sent after each well.
#[derive(Debug, Clone)]
pub struct BatchProgress {
    /// Wells done so far, 1-based.
    pub current: usize,
    pub total: usize,
    pub well: String,
    pub status: WellStatus,
}

pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Clears the processing flag when the worker ends or a start attempt fails.
struct ProcessingFlag(Arc<AtomicBool>);

impl Drop for ProcessingFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs segmentation, features, aggregation and persistence for a list of
/// wells on one worker thread.
pub struct BatchProcessor {
    worker: Arc<Worker>,
    checkouts: CheckoutRegistry,
    processing: Arc<AtomicBool>,
    state: Arc<Mutex<BatchState>>,
    handle: Mutex<Option<JoinHandle<BatchReport>>>,
    last_report: Mutex<Option<BatchReport>>,
}

impl std::fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("segmentor", &self.worker.segmentor.name())
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl BatchProcessor {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        engine: Arc<FeatureEngine>,
        segmentor: Arc<dyn Segmentor>,
        config: BatchConfig,
        checkouts: CheckoutRegistry,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                gateway,
                engine,
                segmentor,
                config,
                progress: None,
            }),
            checkouts,
            processing: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(BatchState::Idle)),
            handle: Mutex::new(None),
            last_report: Mutex::new(None),
        }
    }

    /// Must be set before the first `start`.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        if let Some(worker) = Arc::get_mut(&mut self.worker) {
            worker.progress = Some(callback);
        }
        self
    }

    pub fn checkouts(&self) -> &CheckoutRegistry {
        &self.checkouts
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BatchState {
        self.state.lock().clone()
    }

    /// Checks out `wells` and processes them on a worker thread. Returns
    /// immediately.
    pub fn start(&self, wells: Vec<SharedWell>) -> Result<()> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AlreadyRunning);
        }
        let flag = ProcessingFlag(self.processing.clone());

        // Collect a finished previous run so its report is not lost.
        self.join_previous();

        let requested: Vec<(WellKey, String)> = wells
            .iter()
            .map(|w| {
                let w = w.lock();
                (w.key(), w.name().to_string())
            })
            .collect();
        let guard = self.checkouts.checkout_all(&requested)?;

        *self.state.lock() = BatchState::Running;
        tracing::info!(
            wells = wells.len(),
            segmentor = self.worker.segmentor.name(),
            "Batch started"
        );

        let worker = self.worker.clone();
        let state = self.state.clone();
        let handle = std::thread::spawn(move || {
            let _flag = flag;
            let _guard = guard;

            let report = panic::catch_unwind(AssertUnwindSafe(|| worker.run(&wells)))
                .unwrap_or_else(|_| BatchReport {
                    state: BatchState::Failed("batch worker panicked".into()),
                    wells: Vec::new(),
                });
            *state.lock() = report.state.clone();
            report
        });
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    /// Blocks until the current run ends and returns its report. Without a
    /// run, returns the last report or an idle one.
    pub fn wait(&self) -> BatchReport {
        self.join_previous();
        self.last_report.lock().clone().unwrap_or_default()
    }

    fn join_previous(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let report = handle.join().unwrap_or_else(|_| BatchReport {
            state: BatchState::Failed("batch worker panicked".into()),
            wells: Vec::new(),
        });
        *self.state.lock() = report.state.clone();
        *self.last_report.lock() = Some(report);
    }
}

struct Worker {
    gateway: Arc<dyn PersistenceGateway>,
    engine: Arc<FeatureEngine>,
    segmentor: Arc<dyn Segmentor>,
    config: BatchConfig,
    progress: Option<ProgressCallback>,
}

impl Worker {
    fn run(&self, wells: &[SharedWell]) -> BatchReport {
        let total = wells.len();
        let mut reports = Vec::with_capacity(total);

        for (i, shared) in wells.iter().enumerate() {
            let mut well = shared.lock();
            let name = well.name().to_string();
            let key = well.key();

            let status = match self.process_well(&mut well) {
                Ok(status) => status,
                Err(e @ Error::Connector { .. }) => {
                    tracing::error!(well = %name, "Batch stopped: {e}");
                    let message = e.to_string();
                    reports.push(WellReport {
                        name,
                        key,
                        status: WellStatus::Error(message.clone()),
                    });
                    return BatchReport {
                        state: BatchState::Failed(message),
                        wells: reports,
                    };
                }
                Err(e) => {
                    tracing::warn!(well = %name, "Well failed: {e}");
                    WellStatus::Error(e.to_string())
                }
            };
            drop(well);

            tracing::debug!(well = %name, ?status, "Well done");
            if let Some(progress) = &self.progress {
                progress(BatchProgress {
                    current: i + 1,
                    total,
                    well: name.clone(),
                    status: status.clone(),
                });
            }
            reports.push(WellReport { name, key, status });
        }

        let report = BatchReport {
            state: BatchState::Completed,
            wells: reports,
        };
        tracing::info!(wells = total, cells = report.total_cells(), "Batch completed");
        report
    }

    /// Segments every field, then replaces the well's stored records in one
    /// pass. A field that fails to load or segment is skipped; the well then
    /// ends as `Error` without a summary.
    fn process_well(&self, well: &mut Well) -> Result<WellStatus> {
        if !well.has_images() {
            tracing::warn!(well = %well.name(), "Skipping well without images");
            return Ok(WellStatus::SkippedNoImage);
        }
        let params = well.parameters().clone();
        params.validate()?;
        if params.process_type == ProcessType::Unprocessed {
            return Ok(WellStatus::Unsegmented);
        }

        let key = well.key();
        let name = well.name().to_string();
        let names = self.engine.feature_names();
        let aggregator = WellAggregator::new(&self.engine, params.intensity_mode);
        let mut acc = aggregator.accumulator();
        let mut staged: Vec<(usize, StoredField)> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut next_id = 0u32;
        let mut warned_unbound = false;

        for field in well.fields_mut() {
            if !field.has_images() {
                continue;
            }
            let index = field.index();
            let result = field
                .load_raster(self.config.background)
                .and_then(|raster| {
                    if !warned_unbound
                        && params.process_type == ProcessType::SingleCell
                        && params
                            .nuclear_channel
                            .as_ref()
                            .and_then(|b| b.resolve(raster))
                            .is_none()
                    {
                        warned_unbound = true;
                        tracing::warn!(
                            well = %name,
                            binding = ?params.nuclear_channel,
                            "Nuclear channel does not resolve; no cells will be found"
                        );
                    }
                    self.segment_field(raster, &params, next_id)
                });
            if self.config.release_rasters {
                field.release_raster();
            }

            match result {
                Ok((cells, values)) => {
                    acc.add_cells(&cells, &values)?;
                    next_id += cells.len() as u32;
                    tracing::debug!(field = index, cells = cells.len(), "Field segmented");
                    staged.push((
                        index,
                        StoredField {
                            feature_names: names.clone(),
                            cells,
                            values,
                        },
                    ));
                }
                Err(e @ Error::Connector { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(well = %name, field = index, "Field skipped: {e}");
                    failed.push(format!("field {index}: {e}"));
                }
            }
        }

        // Nothing is written until every field ran, so the store never mixes
        // records of two runs.
        self.gateway.clear_well(key)?;
        if self.config.store_cells {
            for (index, stored) in &staged {
                self.gateway.write_field_cells(key, *index, stored)?;
            }
        }
        for field in well.fields_mut() {
            field.clear_cells();
        }
        if !self.config.release_cells {
            for (index, stored) in staged {
                if let Some(field) = well.fields_mut().iter_mut().find(|f| f.index() == index) {
                    field.set_cells(stored);
                }
            }
        }
        well.set_cells_modified(!self.config.store_cells);

        let cells = acc.cell_count();
        if !failed.is_empty() {
            well.clear_summary();
            return Ok(WellStatus::Error(failed.join("; ")));
        }
        if cells == 0 {
            well.clear_summary();
            return Ok(WellStatus::Unsegmented);
        }

        well.set_summary(acc.finish());
        well.save_summary(self.gateway.as_ref())?;
        Ok(WellStatus::Segmented { cells })
    }

    fn segment_field(
        &self,
        raster: &RasterStack,
        params: &ParameterSet,
        start_id: u32,
    ) -> Result<(Vec<Cell>, Vec<Vec<f32>>)> {
        let sets = self.segmentor.extract(raster, params)?;
        let cells = CellAssembler::with_start_id(start_id).assemble(sets);
        let values = cells
            .iter()
            .map(|cell| self.engine.compute_all(cell, raster))
            .collect();
        Ok((cells, values))
    }
}
