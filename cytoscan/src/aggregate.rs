//! Per-well feature statistics.

use serde::{Deserialize, Serialize};

use crate::cell::Cell;
use crate::error::{Error, Result};
use crate::features::FeatureEngine;
use crate::parameters::IntensityMode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f32,
    /// Sample standard deviation; 0 with fewer than two values.
    pub stdev: f32,
}

impl FeatureStats {
    /// Coefficient of variation, 0 when the mean is 0.
    pub fn cv(&self) -> f32 {
        if self.mean == 0.0 {
            0.0
        } else {
            self.stdev / self.mean
        }
    }
}

/// Ordered mapping from feature name to its well statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    names: Vec<String>,
    stats: Vec<FeatureStats>,
}

/// Result of matching stored statistics against the current feature list.
#[derive(Debug, Clone, PartialEq)]
pub struct Realigned {
    pub summary: FeatureSummary,
    /// Current features with no stored statistics (dropped).
    pub missing: Vec<String>,
    /// Stored features no longer computed.
    pub unexpected: Vec<String>,
}

impl Realigned {
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty()
    }
}

impl FeatureSummary {
    pub fn from_vectors(names: Vec<String>, means: &[f32], stdevs: &[f32]) -> Result<Self> {
        if names.len() != means.len() || names.len() != stdevs.len() {
            return Err(Error::InvalidParameter(format!(
                "{} feature names for {} means and {} stdevs",
                names.len(),
                means.len(),
                stdevs.len()
            )));
        }
        let stats = means
            .iter()
            .zip(stdevs)
            .map(|(&mean, &stdev)| FeatureStats { mean, stdev })
            .collect();
        Ok(Self { names, stats })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, name: &str) -> Option<FeatureStats> {
        let idx = self.names.iter().position(|n| n == name)?;
        Some(self.stats[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FeatureStats)> {
        self.names.iter().map(String::as_str).zip(self.stats.iter().copied())
    }

    pub fn means(&self) -> Vec<f32> {
        self.stats.iter().map(|s| s.mean).collect()
    }

    pub fn stdevs(&self) -> Vec<f32> {
        self.stats.iter().map(|s| s.stdev).collect()
    }

    /// Reorders to `names`, dropping names this summary does not contain.
    pub fn realign(&self, names: &[String]) -> Realigned {
        let mut summary = FeatureSummary::default();
        let mut missing = Vec::new();
        for name in names {
            match self.get(name) {
                Some(stats) => {
                    summary.names.push(name.clone());
                    summary.stats.push(stats);
                }
                None => missing.push(name.clone()),
            }
        }
        let unexpected = self
            .names
            .iter()
            .filter(|n| !names.contains(n))
            .cloned()
            .collect();
        Realigned {
            summary,
            missing,
            unexpected,
        }
    }
}

/// Welford running mean/variance of one feature.
#[derive(Debug, Clone, Copy, Default)]
struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn finish(&self) -> FeatureStats {
        let stdev = if self.count < 2 {
            0.0
        } else {
            (self.m2 / (self.count - 1) as f64).sqrt()
        };
        FeatureStats {
            mean: self.mean as f32,
            stdev: stdev as f32,
        }
    }
}

/// Feature layout and intensity mode used to aggregate one well.
#[derive(Debug, Clone)]
pub struct WellAggregator {
    names: Vec<String>,
    normalization: Vec<Option<String>>,
    mode: IntensityMode,
}

impl WellAggregator {
    pub fn new(engine: &FeatureEngine, mode: IntensityMode) -> Self {
        Self {
            names: engine.feature_names(),
            normalization: engine.normalization_compartments(),
            mode,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn accumulator(&self) -> WellAccumulator<'_> {
        WellAccumulator {
            aggregator: self,
            stats: vec![RunningStats::default(); self.names.len()],
            cell_count: 0,
        }
    }

    /// Mean and sample stdev per feature over `cells`.
    pub fn aggregate(&self, cells: &[Cell], values: &[Vec<f32>]) -> Result<FeatureSummary> {
        let mut acc = self.accumulator();
        acc.add_cells(cells, values)?;
        Ok(acc.finish())
    }

    /// Value as aggregated: divided by the normalization compartment size in
    /// mean mode, 0 for an empty compartment.
    fn normalized(&self, feature: usize, cell: &Cell, value: f32) -> f64 {
        let value = value as f64;
        match (&self.normalization[feature], self.mode) {
            (Some(compartment), IntensityMode::Mean) => {
                let count = cell.pixel_count(compartment);
                if count == 0 { 0.0 } else { value / count as f64 }
            }
            _ => value,
        }
    }
}

/// Streaming aggregation; cells can be dropped after each field is added.
#[derive(Debug, Clone)]
pub struct WellAccumulator<'a> {
    aggregator: &'a WellAggregator,
    stats: Vec<RunningStats>,
    cell_count: usize,
}

impl WellAccumulator<'_> {
    pub fn add_cell(&mut self, cell: &Cell, values: &[f32]) -> Result<()> {
        if values.len() != self.stats.len() {
            return Err(Error::InvalidParameter(format!(
                "cell {} has {} values for {} features",
                cell.id(),
                values.len(),
                self.stats.len()
            )));
        }
        for (i, (&value, stats)) in values.iter().zip(self.stats.iter_mut()).enumerate() {
            if value.is_finite() {
                stats.push(self.aggregator.normalized(i, cell, value));
            }
        }
        self.cell_count += 1;
        Ok(())
    }

    pub fn add_cells(&mut self, cells: &[Cell], values: &[Vec<f32>]) -> Result<()> {
        if cells.len() != values.len() {
            return Err(Error::InvalidParameter(format!(
                "{} cells given with {} value vectors",
                cells.len(),
                values.len()
            )));
        }
        for (cell, v) in cells.iter().zip(values) {
            self.add_cell(cell, v)?;
        }
        Ok(())
    }

    pub fn cell_count(&self) -> usize {
        self.cell_count
    }

    pub fn finish(&self) -> FeatureSummary {
        FeatureSummary {
            names: self.aggregator.names.clone(),
            stats: self.stats.iter().map(RunningStats::finish).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cell::{CellAssembler, CellCompartment, NUCLEUS, Point};
    use crate::features::{CompartmentIntensity, CompartmentSize};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn cells_with_nuclei(sizes: &[usize]) -> Vec<Cell> {
        let sets = sizes
            .iter()
            .map(|&n| {
                let points = (0..n as u32).map(|x| Point::new(x, 0)).collect();
                vec![CellCompartment::new(NUCLEUS, points)]
            })
            .collect();
        CellAssembler::new().assemble(sets)
    }

    fn engine() -> FeatureEngine {
        let mut engine = FeatureEngine::new(names(&["DAPI"]));
        engine
            .register(Arc::new(CompartmentSize::new("Size_nucleus", NUCLEUS)))
            .unwrap();
        engine
            .register(Arc::new(CompartmentIntensity::new("Intensity_nucleus", NUCLEUS)))
            .unwrap();
        engine
    }

    #[test]
    fn test_mean_and_sample_stdev() {
        let aggregator = WellAggregator::new(&engine(), IntensityMode::Integrated);
        let cells = cells_with_nuclei(&[2, 4, 4, 4, 5, 5, 7, 9]);
        let values: Vec<Vec<f32>> = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]
            .iter()
            .map(|&v| vec![v, v * 10.0])
            .collect();

        let summary = aggregator.aggregate(&cells, &values).unwrap();
        let size = summary.get("Size_nucleus").unwrap();
        assert!((size.mean - 5.0).abs() < 1e-6);
        // Population stdev is 2; sample stdev is sqrt(32 / 7).
        assert!((size.stdev - (32.0f32 / 7.0).sqrt()).abs() < 1e-5);

        let intensity = summary.get("Intensity_nucleus_DAPI").unwrap();
        assert!((intensity.mean - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_single_cell_has_zero_stdev() {
        let aggregator = WellAggregator::new(&engine(), IntensityMode::Integrated);
        let cells = cells_with_nuclei(&[3]);
        let summary = aggregator.aggregate(&cells, &[vec![3.0, 30.0]]).unwrap();
        assert_eq!(summary.stdevs(), vec![0.0, 0.0]);
        assert_eq!(summary.means(), vec![3.0, 30.0]);
    }

    #[test]
    fn test_mean_mode_divides_by_compartment_size() {
        let aggregator = WellAggregator::new(&engine(), IntensityMode::Mean);
        let cells = cells_with_nuclei(&[4, 10, 0]);
        let values = vec![vec![4.0, 400.0], vec![10.0, 2000.0], vec![0.0, 0.0]];

        let summary = aggregator.aggregate(&cells, &values).unwrap();
        // Per-pixel intensities 100, 200 and 0 for the empty compartment.
        assert!((summary.get("Intensity_nucleus_DAPI").unwrap().mean - 100.0).abs() < 1e-4);
        // Size features are never normalized.
        assert!((summary.get("Size_nucleus").unwrap().mean - 14.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_non_finite_values_skipped() {
        let aggregator = WellAggregator::new(&engine(), IntensityMode::Integrated);
        let cells = cells_with_nuclei(&[1, 1, 1]);
        let values = vec![vec![1.0, f32::NAN], vec![3.0, 8.0], vec![5.0, f32::INFINITY]];
        let summary = aggregator.aggregate(&cells, &values).unwrap();
        assert_eq!(summary.get("Intensity_nucleus_DAPI").unwrap(), FeatureStats {
            mean: 8.0,
            stdev: 0.0
        });
    }

    #[test]
    fn test_streaming_matches_batch() {
        let aggregator = WellAggregator::new(&engine(), IntensityMode::Integrated);
        let cells = cells_with_nuclei(&[1, 2, 3, 4]);
        let values: Vec<Vec<f32>> = (1..=4).map(|v| vec![v as f32, v as f32]).collect();

        let whole = aggregator.aggregate(&cells, &values).unwrap();

        let mut acc = aggregator.accumulator();
        acc.add_cells(&cells[..2], &values[..2]).unwrap();
        acc.add_cells(&cells[2..], &values[2..]).unwrap();
        assert_eq!(acc.cell_count(), 4);
        let streamed = acc.finish();

        for ((_, a), (_, b)) in whole.iter().zip(streamed.iter()) {
            assert!((a.mean - b.mean).abs() < 1e-6);
            assert!((a.stdev - b.stdev).abs() < 1e-6);
        }
    }

    #[test]
    fn test_value_count_mismatch_rejected() {
        let aggregator = WellAggregator::new(&engine(), IntensityMode::Integrated);
        let cells = cells_with_nuclei(&[1]);
        assert!(aggregator.aggregate(&cells, &[vec![1.0]]).is_err());
        assert!(aggregator.aggregate(&cells, &[]).is_err());
    }

    #[test]
    fn test_realign_by_name() {
        let stored = FeatureSummary::from_vectors(
            names(&["B", "A", "Old"]),
            &[2.0, 1.0, 9.0],
            &[0.2, 0.1, 0.9],
        )
        .unwrap();

        let realigned = stored.realign(&names(&["A", "B", "New"]));
        assert_eq!(realigned.summary.names(), &names(&["A", "B"])[..]);
        assert_eq!(realigned.summary.means(), vec![1.0, 2.0]);
        assert_eq!(realigned.missing, names(&["New"]));
        assert_eq!(realigned.unexpected, names(&["Old"]));
        assert!(!realigned.is_exact());

        assert!(stored.realign(stored.names()).is_exact());
    }

    #[test]
    fn test_from_vectors_length_check() {
        assert!(FeatureSummary::from_vectors(names(&["A"]), &[1.0, 2.0], &[0.0]).is_err());
    }

    #[test]
    fn test_cv() {
        let stats = FeatureStats {
            mean: 4.0,
            stdev: 1.0,
        };
        assert_eq!(stats.cv(), 0.25);
        assert_eq!(FeatureStats::default().cv(), 0.0);
    }
}
