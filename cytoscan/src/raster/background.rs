//! Global background level estimation for a single channel plane.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// MAD to standard deviation conversion factor for normally distributed noise.
pub const MAD_TO_SIGMA: f32 = 1.4826022;

/// Upper bound on pixels fed to the sigma-clipping estimator.
const MAX_CLIP_SAMPLES: usize = 1 << 18;

/// How a channel's background level is estimated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BackgroundMethod {
    /// Median after iterative rejection of pixels beyond `kappa` sigma.
    SigmaClippedMedian { kappa: f32, iterations: usize },
    /// Intensity at the given percentile (0..=100).
    LowPercentile { percentile: f32 },
    /// Most frequent intensity.
    HistogramMode,
}

impl Default for BackgroundMethod {
    fn default() -> Self {
        Self::SigmaClippedMedian {
            kappa: 3.0,
            iterations: 5,
        }
    }
}

impl BackgroundMethod {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::SigmaClippedMedian { kappa, iterations } => {
                if !kappa.is_finite() || kappa <= 0.0 {
                    return Err(Error::InvalidParameter(format!(
                        "sigma clipping kappa must be positive, got {kappa}"
                    )));
                }
                if iterations == 0 {
                    return Err(Error::InvalidParameter(
                        "sigma clipping needs at least one iteration".into(),
                    ));
                }
            }
            Self::LowPercentile { percentile: p } => {
                if !(0.0..=100.0).contains(&p) {
                    return Err(Error::InvalidParameter(format!(
                        "percentile must be in 0..=100, got {p}"
                    )));
                }
            }
            Self::HistogramMode => {}
        }
        Ok(())
    }

    /// Estimates the background of `pixels`. An empty plane has background 0.
    pub fn estimate(&self, pixels: &[u16]) -> Result<f32> {
        self.validate()?;
        if pixels.is_empty() {
            return Ok(0.0);
        }

        Ok(match *self {
            Self::SigmaClippedMedian { kappa, iterations } => {
                let step = pixels.len().div_ceil(MAX_CLIP_SAMPLES).max(1);
                let mut values: Vec<f32> = pixels.iter().step_by(step).map(|&v| v as f32).collect();
                sigma_clipped_median(&mut values, kappa, iterations)
            }
            Self::LowPercentile { percentile: p } => percentile(&histogram(pixels), pixels.len(), p),
            Self::HistogramMode => mode(&histogram(pixels)),
        })
    }
}

fn histogram(pixels: &[u16]) -> Vec<u32> {
    let mut hist = vec![0u32; u16::MAX as usize + 1];
    for &v in pixels {
        hist[v as usize] += 1;
    }
    hist
}

fn percentile(hist: &[u32], total: usize, p: f32) -> f32 {
    // Rank of the requested sample, 1-based.
    let rank = ((p as f64 / 100.0) * total as f64).ceil().max(1.0) as u64;
    let mut seen = 0u64;
    for (value, &count) in hist.iter().enumerate() {
        seen += count as u64;
        if seen >= rank {
            return value as f32;
        }
    }
    (hist.len() - 1) as f32
}

fn mode(hist: &[u32]) -> f32 {
    let mut best = 0usize;
    for (value, &count) in hist.iter().enumerate() {
        if count > hist[best] {
            best = value;
        }
    }
    best as f32
}

/// Median of the values in-place (quickselect, averages the middle pair).
pub(crate) fn median_f32_mut(data: &mut [f32]) -> f32 {
    debug_assert!(!data.is_empty());

    let n = data.len();
    let mid = n / 2;
    let (left, median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
    let right = *median;
    if n % 2 == 1 {
        return right;
    }
    let left = left.iter().copied().fold(f32::MIN, f32::max);
    (left + right) * 0.5
}

fn sigma_clipped_median(values: &mut [f32], kappa: f32, iterations: usize) -> f32 {
    let mut len = values.len();
    let mut deviations = vec![0.0f32; len];

    for _ in 0..iterations {
        if len < 3 {
            break;
        }
        let active = &mut values[..len];
        let median = median_f32_mut(active);

        for (d, &v) in deviations.iter_mut().zip(active.iter()) {
            *d = (v - median).abs();
        }
        let sigma = median_f32_mut(&mut deviations[..len]) * MAD_TO_SIGMA;
        if sigma < f32::EPSILON {
            return median;
        }

        let threshold = kappa * sigma;
        let mut write = 0;
        for i in 0..len {
            if (values[i] - median).abs() <= threshold {
                values[write] = values[i];
                write += 1;
            }
        }
        if write == len {
            return median;
        }
        len = write;
    }

    if len == 0 {
        return 0.0;
    }
    median_f32_mut(&mut values[..len])
}
