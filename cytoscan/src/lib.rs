//! Cytoscan - cell segmentation and per-cell features for plate microscopy.
//!
//! The pipeline turns multi-channel TIFF fields into cells and statistics:
//! - Raster loading with per-channel background estimation
//! - Nucleus / whole-cell / cytoplasm segmentation with watershed splitting
//! - Pluggable per-cell features, expanded over channels
//! - Per-well mean and standard deviation, persisted per project
//! - Background batch processing over the selected wells of a plate
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cytoscan::*;
//!
//! let config = ProjectConfig::load("project.yaml".as_ref())?;
//! let plate = config.build_plate()?;
//! let engine = Arc::new(FeatureEngine::with_default_features(config.channel_names.clone()));
//! let batch = BatchProcessor::new(
//!     Arc::new(ProjectStore::new(&config.project_dir)),
//!     engine,
//!     Arc::new(ThresholdSegmentor::new(config.segmentation.clone())?),
//!     config.batch.clone(),
//!     CheckoutRegistry::new(),
//! );
//! batch.start(plate.selected_wells(WellOrder::Horizontal))?;
//! let report = batch.wait();
//! ```

pub mod aggregate;
pub mod batch;
pub mod cell;
pub mod config;
mod error;
pub mod features;
pub mod parameters;
pub mod persistence;
pub mod plate;
pub mod raster;
pub mod segmentation;

#[cfg(test)]
mod testing;

#[cfg(test)]
mod tests;

// ============================================================================
// Errors
// ============================================================================

pub use error::{Error, Result};

// ============================================================================
// Data model
// ============================================================================

pub use cell::{
    BOUNDING_BOX, CYTOPLASM, Cell, CellAssembler, CellCompartment, CellId, NUCLEUS, Point,
    WHOLE_CELL,
};
pub use parameters::{ChannelBinding, IntensityMode, ParameterSet, ProcessType};
pub use plate::{Field, Plate, SharedWell, StatKind, Well, WellOrder, well_name};
pub use raster::{BackgroundMethod, RasterStack};

// ============================================================================
// Segmentation and features
// ============================================================================

pub use features::{
    BoundFeature, CompartmentIntensity, CompartmentSize, Feature, FeatureContext, FeatureEngine,
    NuclearCytoplasmicRatio,
};
pub use segmentation::{
    CompartmentSet, Connectivity, SegmentationConfig, Segmentor, ThresholdSegmentor,
};

// ============================================================================
// Aggregation and storage
// ============================================================================

pub use aggregate::{FeatureStats, FeatureSummary, Realigned, WellAccumulator, WellAggregator};
pub use persistence::{MemoryStore, PersistenceGateway, ProjectStore, StoredField, WellKey};

// ============================================================================
// Batch processing
// ============================================================================

pub use batch::{
    BatchConfig, BatchProcessor, BatchProgress, BatchReport, BatchState, CellLoader,
    CheckoutRegistry, LoadReport, LoadStatus, ProgressCallback, WellReport, WellStatus,
};
pub use config::ProjectConfig;
