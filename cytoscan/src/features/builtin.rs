use std::sync::Arc;

use super::{Feature, FeatureContext};
use crate::cell::{CYTOPLASM, NUCLEUS, WHOLE_CELL};

/// Pixel count of one compartment.
#[derive(Debug, Clone)]
pub struct CompartmentSize {
    name: String,
    compartment: String,
}

impl CompartmentSize {
    pub fn new(name: impl Into<String>, compartment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compartment: compartment.into(),
        }
    }
}

impl Feature for CompartmentSize {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, ctx: &FeatureContext<'_>) -> f32 {
        ctx.cell.pixel_count(&self.compartment) as f32
    }
}

/// Background-subtracted integrated intensity of one compartment.
/// Normalized by the compartment size in mean intensity mode.
#[derive(Debug, Clone)]
pub struct CompartmentIntensity {
    name: String,
    compartment: String,
}

impl CompartmentIntensity {
    pub fn new(name: impl Into<String>, compartment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compartment: compartment.into(),
        }
    }
}

impl Feature for CompartmentIntensity {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_multi_spectral(&self) -> bool {
        true
    }

    fn normalization_compartment(&self) -> Option<&str> {
        Some(&self.compartment)
    }

    fn compute(&self, ctx: &FeatureContext<'_>) -> f32 {
        ctx.integrated_intensity(&self.compartment) as f32
    }
}

/// Mean nuclear over mean cytoplasmic intensity; 0 without cytoplasm signal.
#[derive(Debug, Clone, Default)]
pub struct NuclearCytoplasmicRatio;

impl Feature for NuclearCytoplasmicRatio {
    fn name(&self) -> &str {
        "Ratio_nuc_cyto"
    }

    fn is_multi_spectral(&self) -> bool {
        true
    }

    fn compute(&self, ctx: &FeatureContext<'_>) -> f32 {
        let cyto = ctx.mean_intensity(CYTOPLASM);
        if cyto <= 0.0 {
            return 0.0;
        }
        (ctx.mean_intensity(NUCLEUS) / cyto) as f32
    }
}

pub(super) fn default_features() -> Vec<Arc<dyn Feature>> {
    vec![
        Arc::new(CompartmentSize::new("Size_nucleus", NUCLEUS)),
        Arc::new(CompartmentSize::new("Size_whole", WHOLE_CELL)),
        Arc::new(CompartmentSize::new("Size_cytoplasm", CYTOPLASM)),
        Arc::new(CompartmentIntensity::new("Intensity_nucleus", NUCLEUS)),
        Arc::new(CompartmentIntensity::new("Intensity_whole", WHOLE_CELL)),
        Arc::new(CompartmentIntensity::new("Intensity_cytoplasm", CYTOPLASM)),
        Arc::new(NuclearCytoplasmicRatio),
    ]
}
