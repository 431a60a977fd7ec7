//! Splitting of touching nuclei by seeded priority flooding.
//!
//! Seeds are local intensity maxima inside a component that are bright
//! enough relative to the component's peak and far enough apart. Pixels are
//! then claimed in descending intensity order from the seeds, so boundaries
//! settle in the intensity valleys between nuclei.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use common::Buffer2;

use super::config::{Connectivity, SegmentationConfig};
use super::labeling::LabelMap;
use super::neighbors;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct Peak {
    pub idx: usize,
    pub x: usize,
    pub y: usize,
    pub value: f32,
}

/// Relabels `labels` so that components with several qualifying peaks are
/// split into one label per peak.
pub(super) fn split_touching(
    labels: &LabelMap,
    intensity: &Buffer2<f32>,
    config: &SegmentationConfig,
) -> LabelMap {
    debug_assert_eq!(
        (labels.width(), labels.height()),
        intensity.dimensions(),
        "labels and intensity must have same dimensions"
    );

    let min_sep_sq = config.min_peak_separation * config.min_peak_separation;
    let mut out = Buffer2::new_default(labels.width(), labels.height());
    let mut next_label = 0u32;
    let mut split_count = 0usize;

    for (i, pixels) in labels.component_pixels().iter().enumerate() {
        let component = i as u32 + 1;
        let peaks = find_local_maxima(pixels, intensity, config.min_peak_prominence, min_sep_sq);

        if peaks.len() <= 1 {
            next_label += 1;
            for &idx in pixels {
                out[idx] = next_label;
            }
            continue;
        }

        split_count += 1;
        flood_from_peaks(
            labels,
            component,
            intensity,
            &peaks,
            next_label,
            config.connectivity,
            &mut out,
        );
        next_label += peaks.len() as u32;
    }

    if split_count > 0 {
        tracing::debug!(split_count, "Split touching nuclei");
    }

    LabelMap::from_raw(out)
}

/// Local maxima of one component, brightest first.
pub(super) fn find_local_maxima(
    pixels: &[usize],
    intensity: &Buffer2<f32>,
    min_prominence: f32,
    min_sep_sq: f32,
) -> Vec<Peak> {
    let width = intensity.width();
    let global = pixels
        .iter()
        .map(|&idx| intensity[idx])
        .fold(f32::MIN, f32::max);
    let min_peak_value = global * min_prominence;

    let mut peaks: Vec<Peak> = Vec::new();
    for &idx in pixels {
        let peak = Peak {
            idx,
            x: idx % width,
            y: idx / width,
            value: intensity[idx],
        };
        if peak.value < min_peak_value || !is_local_maximum(peak, intensity) {
            continue;
        }
        add_or_replace_peak(&mut peaks, peak, min_sep_sq);
    }

    peaks.sort_by(|a, b| b.value.total_cmp(&a.value).then(a.idx.cmp(&b.idx)));
    peaks
}

/// Strictly greater than all 8 neighbors. Flat plateaus produce no peak.
fn is_local_maximum(peak: Peak, intensity: &Buffer2<f32>) -> bool {
    neighbors(
        peak.idx,
        intensity.width(),
        intensity.height(),
        Connectivity::Eight,
    )
    .all(|n| intensity[n] < peak.value)
}

/// Adds a peak, or replaces a nearby dimmer one.
fn add_or_replace_peak(peaks: &mut Vec<Peak>, peak: Peak, min_sep_sq: f32) {
    let near = peaks.iter().position(|p| {
        let dx = p.x as f32 - peak.x as f32;
        let dy = p.y as f32 - peak.y as f32;
        dx * dx + dy * dy < min_sep_sq
    });
    match near {
        None => peaks.push(peak),
        Some(i) if peak.value > peaks[i].value => peaks[i] = peak,
        Some(_) => {}
    }
}

#[derive(Debug, Clone, Copy)]
struct FloodEntry {
    value: f32,
    seq: u64,
    idx: usize,
    label: u32,
}

impl PartialEq for FloodEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FloodEntry {}

impl PartialOrd for FloodEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloodEntry {
    // Max-heap: brightest first, earliest pushed first among equals.
    fn cmp(&self, other: &Self) -> Ordering {
        self.value
            .total_cmp(&other.value)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

fn flood_from_peaks(
    labels: &LabelMap,
    component: u32,
    intensity: &Buffer2<f32>,
    peaks: &[Peak],
    base_label: u32,
    connectivity: Connectivity,
    out: &mut Buffer2<u32>,
) {
    let width = intensity.width();
    let height = intensity.height();
    let mut heap = BinaryHeap::new();
    let mut seq = 0u64;

    for (k, peak) in peaks.iter().enumerate() {
        let label = base_label + k as u32 + 1;
        out[peak.idx] = label;
        heap.push(FloodEntry {
            value: peak.value,
            seq,
            idx: peak.idx,
            label,
        });
        seq += 1;
    }

    while let Some(entry) = heap.pop() {
        for n in neighbors(entry.idx, width, height, connectivity) {
            if labels[n] != component || out[n] != 0 {
                continue;
            }
            out[n] = entry.label;
            heap.push(FloodEntry {
                value: intensity[n],
                seq,
                idx: n,
                label: entry.label,
            });
            seq += 1;
        }
    }
}
