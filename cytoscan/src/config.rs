//! Project configuration file (YAML, JSON or TOML).

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use common::SerdeFormat;
use serde::{Deserialize, Serialize};

use crate::batch::BatchConfig;
use crate::parameters::ParameterSet;
use crate::plate::{Field, Plate};
use crate::segmentation::SegmentationConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateConfig {
    pub id: usize,
    pub title: Option<String>,
    pub rows: usize,
    pub cols: usize,
}

impl Default for PlateConfig {
    fn default() -> Self {
        Self {
            id: 1,
            title: None,
            rows: 8,
            cols: 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellConfig {
    /// Well name such as `B03`.
    pub name: String,
    /// Overrides the project defaults.
    #[serde(default)]
    pub parameters: Option<ParameterSet>,
    #[serde(default = "default_selected")]
    pub selected: bool,
    /// One list of channel image paths per field, ordered as `channel_names`.
    #[serde(default)]
    pub fields: Vec<Vec<PathBuf>>,
}

fn default_selected() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Results are stored under `<project_dir>/Data`.
    pub project_dir: PathBuf,
    pub log_level: String,
    pub channel_names: Vec<String>,
    pub plate: PlateConfig,
    pub segmentation: SegmentationConfig,
    pub batch: BatchConfig,
    pub defaults: ParameterSet,
    pub wells: Vec<WellConfig>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            log_level: "info".to_string(),
            channel_names: Vec::new(),
            plate: PlateConfig::default(),
            segmentation: SegmentationConfig::default(),
            batch: BatchConfig::default(),
            defaults: ParameterSet::default(),
            wells: Vec::new(),
        }
    }
}

impl ProjectConfig {
    /// Reads a config; the format follows the file extension. Relative paths
    /// are resolved against the config file's directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let format = SerdeFormat::from_path(path)
            .with_context(|| format!("Unsupported config file '{}'", path.display()))?;
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?;
        let mut config: Self = common::serde::deserialize(&bytes, format)
            .with_context(|| format!("Failed to parse config '{}'", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.project_dir);
        for well in &mut self.wells {
            well.fields.iter_mut().flatten().for_each(resolve);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.segmentation.validate()?;
        self.batch.background.validate()?;
        self.defaults
            .validate()
            .context("Invalid default parameters")?;

        for well in &self.wells {
            for (i, field) in well.fields.iter().enumerate() {
                if field.len() != self.channel_names.len() {
                    bail!(
                        "Well {} field {i} lists {} images for {} channels",
                        well.name,
                        field.len(),
                        self.channel_names.len()
                    );
                }
            }
        }
        Ok(())
    }

    /// Plate with the configured wells, fields and parameters.
    pub fn build_plate(&self) -> anyhow::Result<Plate> {
        let mut plate = Plate::new(self.plate.id, self.plate.rows, self.plate.cols)?;
        plate.title = self.plate.title.clone();

        for well_config in &self.wells {
            let Some(shared) = plate.well_by_name(&well_config.name) else {
                bail!(
                    "Well {} is outside the {}x{} plate",
                    well_config.name,
                    self.plate.rows,
                    self.plate.cols
                );
            };
            let mut well = shared.lock();
            let parameters = well_config
                .parameters
                .clone()
                .unwrap_or_else(|| self.defaults.clone());
            well.set_parameters(parameters)
                .with_context(|| format!("Invalid parameters for well {}", well_config.name))?;
            well.selected = well_config.selected;
            for (index, paths) in well_config.fields.iter().enumerate() {
                well.add_field(Field::new(index, paths.clone(), self.channel_names.clone()));
            }
        }
        Ok(plate)
    }
}
