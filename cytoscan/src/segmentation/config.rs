//! Segmentation configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Pixel connectivity for labeling and region growth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Edge-adjacent neighbors only.
    Four,
    /// Edge and corner neighbors.
    #[default]
    Eight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub connectivity: Connectivity,
    /// Split touching nuclei along intensity valleys.
    pub watershed: bool,
    /// Minimum peak height as a fraction of the component's brightest pixel.
    pub min_peak_prominence: f32,
    /// Minimum distance in pixels between two seeds of one component.
    pub min_peak_separation: f32,
    pub min_nucleus_area: usize,
    pub max_nucleus_area: Option<usize>,
    /// Maximum geodesic distance of a cell-body pixel from its nucleus.
    pub max_cell_radius: Option<u32>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::Eight,
            watershed: true,
            min_peak_prominence: 0.3,
            min_peak_separation: 3.0,
            min_nucleus_area: 4,
            max_nucleus_area: None,
            max_cell_radius: None,
        }
    }
}

impl SegmentationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_nucleus_area == 0 {
            return Err(Error::InvalidParameter(
                "min_nucleus_area must be at least 1".into(),
            ));
        }
        if let Some(max) = self.max_nucleus_area
            && max < self.min_nucleus_area
        {
            return Err(Error::InvalidParameter(format!(
                "max_nucleus_area ({max}) is below min_nucleus_area ({})",
                self.min_nucleus_area
            )));
        }
        if !(self.min_peak_prominence.is_finite()
            && (0.0..=1.0).contains(&self.min_peak_prominence))
        {
            return Err(Error::InvalidParameter(format!(
                "min_peak_prominence must be in 0..=1, got {}",
                self.min_peak_prominence
            )));
        }
        if !self.min_peak_separation.is_finite() || self.min_peak_separation < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "min_peak_separation must be non-negative, got {}",
                self.min_peak_separation
            )));
        }
        Ok(())
    }
}
