//! Per-well processing parameters.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::raster::RasterStack;

/// A channel referenced by both name and position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelBinding {
    pub index: usize,
    pub name: String,
}

impl ChannelBinding {
    pub fn new(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }

    /// Locates the channel in `raster`, preferring the name over the index.
    pub fn resolve(&self, raster: &RasterStack) -> Option<usize> {
        if raster.channel_names().get(self.index) == Some(&self.name) {
            return Some(self.index);
        }
        if self.name.is_empty() {
            return (self.index < raster.num_channels()).then_some(self.index);
        }
        raster.channel_index(&self.name)
    }
}

/// Whether intensity features are reported per pixel or summed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityMode {
    #[default]
    Mean,
    Integrated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    /// Well is not segmented.
    Unprocessed,
    /// One object per segmented cell.
    #[default]
    SingleCell,
    /// One whole-field object per field.
    WellMean,
}

/// Thresholds, channel choices and modes used to segment one well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSet {
    pub threshold_nucleus: f32,
    pub threshold_cell: f32,
    pub threshold_background: f32,
    /// Defaults to the first channel.
    pub nuclear_channel: Option<ChannelBinding>,
    pub cytoplasm_channel: Option<ChannelBinding>,
    /// `None` disables annulus mode.
    pub annulus_size: Option<u32>,
    pub intensity_mode: IntensityMode,
    pub process_type: ProcessType,
    #[serde(skip)]
    pub modified: bool,
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            threshold_nucleus: 100.0,
            threshold_cell: 100.0,
            threshold_background: 0.0,
            nuclear_channel: Some(ChannelBinding::new(0, "")),
            cytoplasm_channel: None,
            annulus_size: None,
            intensity_mode: IntensityMode::Mean,
            process_type: ProcessType::SingleCell,
            modified: false,
        }
    }
}

impl ParameterSet {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("threshold_nucleus", self.threshold_nucleus),
            ("threshold_cell", self.threshold_cell),
            ("threshold_background", self.threshold_background),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }

    /// Background-corrected intensity `max(v - threshold_background, 0)`.
    #[inline]
    pub fn corrected(&self, value: u16) -> f32 {
        (value as f32 - self.threshold_background).max(0.0)
    }
}
