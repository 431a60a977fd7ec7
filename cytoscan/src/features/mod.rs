//! Pluggable per-cell feature computations.
//!
//! A [`Feature`] computes one number per cell. Multi-spectral features are
//! expanded at registration into one bound instance per image channel; the
//! binding is fixed for the lifetime of the instance.

mod builtin;

use std::fmt;
use std::sync::Arc;

use hashbrown::HashSet;

use crate::cell::Cell;
use crate::error::{Error, Result};
use crate::parameters::ChannelBinding;
use crate::raster::RasterStack;

pub use builtin::{CompartmentIntensity, CompartmentSize, NuclearCytoplasmicRatio};

/// Inputs available to a feature while computing one cell.
#[derive(Debug, Clone, Copy)]
pub struct FeatureContext<'a> {
    pub cell: &'a Cell,
    pub raster: &'a RasterStack,
    /// Resolved channel index for multi-spectral features.
    pub channel: Option<usize>,
}

impl FeatureContext<'_> {
    /// Background-subtracted intensity summed over a compartment on the bound
    /// channel. Pixels below background contribute 0. Returns 0 when the
    /// channel, plane or coordinates are unavailable.
    pub fn integrated_intensity(&self, compartment: &str) -> f64 {
        let Some(channel) = self.channel else {
            return 0.0;
        };
        let (Some(plane), Some(points)) = (
            self.raster.plane(channel),
            self.cell.compartment(compartment).and_then(|c| c.coordinates()),
        ) else {
            return 0.0;
        };
        let background = self.raster.background(channel).unwrap_or(0.0) as f64;

        points
            .iter()
            .filter(|p| (p.x as usize) < plane.width() && (p.y as usize) < plane.height())
            .map(|p| (plane[(p.x as usize, p.y as usize)] as f64 - background).max(0.0))
            .sum()
    }

    /// Integrated intensity divided by the compartment size, 0 for empty compartments.
    pub fn mean_intensity(&self, compartment: &str) -> f64 {
        let count = self.cell.pixel_count(compartment);
        if count == 0 {
            return 0.0;
        }
        self.integrated_intensity(compartment) / count as f64
    }
}

pub trait Feature: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Expanded once per channel when registered.
    fn is_multi_spectral(&self) -> bool {
        false
    }

    /// Compartment whose pixel count divides this feature in mean intensity mode.
    fn normalization_compartment(&self) -> Option<&str> {
        None
    }

    fn compute(&self, ctx: &FeatureContext<'_>) -> f32;
}

/// A registered feature with its (optional) channel binding and final name.
#[derive(Debug, Clone)]
pub struct BoundFeature {
    feature: Arc<dyn Feature>,
    channel: Option<ChannelBinding>,
    name: String,
}

impl BoundFeature {
    fn new(feature: Arc<dyn Feature>, channel: Option<ChannelBinding>) -> Self {
        let name = match &channel {
            Some(binding) => format!("{}_{}", feature.name(), binding.name),
            None => feature.name().to_string(),
        };
        Self {
            feature,
            channel,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> Option<&ChannelBinding> {
        self.channel.as_ref()
    }

    pub fn feature(&self) -> &Arc<dyn Feature> {
        &self.feature
    }

    pub fn normalization_compartment(&self) -> Option<&str> {
        self.feature.normalization_compartment()
    }

    /// Computes the value, coercing non-finite results to 0.
    pub fn compute(&self, cell: &Cell, raster: &RasterStack) -> f32 {
        let channel = match &self.channel {
            Some(binding) => match binding.resolve(raster) {
                Some(index) => Some(index),
                None => return 0.0,
            },
            None => None,
        };
        let value = self.feature.compute(&FeatureContext {
            cell,
            raster,
            channel,
        });
        if value.is_finite() { value } else { 0.0 }
    }
}

/// Ordered registry of bound features.
#[derive(Debug, Clone, Default)]
pub struct FeatureEngine {
    channel_names: Vec<String>,
    features: Vec<BoundFeature>,
}

impl FeatureEngine {
    pub fn new(channel_names: Vec<String>) -> Self {
        Self {
            channel_names,
            features: Vec::new(),
        }
    }

    /// Engine with the built-in size, intensity and ratio features.
    pub fn with_default_features(channel_names: Vec<String>) -> Self {
        let mut engine = Self::new(channel_names);
        for feature in builtin::default_features() {
            // Built-in names are distinct.
            if let Err(err) = engine.register(feature) {
                tracing::error!("Failed to register built-in feature: {err}");
            }
        }
        engine
    }

    /// Registers a feature, expanding multi-spectral ones over all channels.
    /// Nothing is registered if any resulting name already exists.
    pub fn register(&mut self, feature: Arc<dyn Feature>) -> Result<()> {
        if feature.name().is_empty() {
            return Err(Error::InvalidParameter("feature name is empty".into()));
        }

        let bound: Vec<BoundFeature> = if feature.is_multi_spectral() {
            self.channel_names
                .iter()
                .enumerate()
                .map(|(index, name)| {
                    BoundFeature::new(feature.clone(), Some(ChannelBinding::new(index, name)))
                })
                .collect()
        } else {
            vec![BoundFeature::new(feature, None)]
        };

        {
            let mut seen: HashSet<&str> = self.features.iter().map(|f| f.name()).collect();
            for b in &bound {
                if !seen.insert(b.name()) {
                    return Err(Error::InvalidParameter(format!(
                        "feature '{}' is already registered",
                        b.name()
                    )));
                }
            }
        }

        self.features.extend(bound);
        Ok(())
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn features(&self) -> &[BoundFeature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    /// Normalization compartment of each feature, in registration order.
    pub fn normalization_compartments(&self) -> Vec<Option<String>> {
        self.features
            .iter()
            .map(|f| f.normalization_compartment().map(str::to_string))
            .collect()
    }

    /// One value per registered feature, in registration order. Always finite.
    pub fn compute_all(&self, cell: &Cell, raster: &RasterStack) -> Vec<f32> {
        self.features.iter().map(|f| f.compute(cell, raster)).collect()
    }

    /// Fails when `names` is not exactly this engine's feature list.
    pub fn check_schema(&self, names: &[String]) -> Result<()> {
        let expected = self.feature_names();
        if expected.as_slice() == names {
            Ok(())
        } else {
            Err(Error::ConfigurationMismatch {
                expected,
                found: names.to_vec(),
            })
        }
    }
}
