//! Compartment extraction: thresholding, labeling and cell body growth.
//!
//! Pipeline for single-cell processing:
//! 1. Background-corrected nuclear intensity is thresholded into a mask
//! 2. The mask is labeled into connected components
//! 3. Touching nuclei are optionally split at intensity valleys
//! 4. Nuclei outside the configured area range are dropped
//! 5. Cell bodies grow from each nucleus through the cell mask
//! 6. Cytoplasm and bounding box compartments are derived per cell

mod config;
mod dilation;
mod labeling;
mod region;
mod watershed;

use common::{BitBuffer2, Buffer2};
use rayon::prelude::*;

use crate::cell::{CYTOPLASM, CellCompartment, NUCLEUS, Point, WHOLE_CELL};
use crate::error::Result;
use crate::parameters::{ParameterSet, ProcessType};
use crate::raster::RasterStack;

pub use config::{Connectivity, SegmentationConfig};
pub use dilation::dilate_mask;
pub use labeling::LabelMap;

/// Compartments of one cell, in the order `Nucleus, WholeCell, Cytoplasm, BoundingBox`.
pub type CompartmentSet = Vec<CellCompartment>;

/// Turns a field raster into per-cell compartment sets.
///
/// Implementations must not mutate shared state; the same segmentor is used
/// from the batch worker while callers keep a handle.
pub trait Segmentor: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    fn extract(&self, raster: &RasterStack, params: &ParameterSet) -> Result<Vec<CompartmentSet>>;
}

/// Threshold based segmentor with optional watershed splitting.
#[derive(Debug, Clone, Default)]
pub struct ThresholdSegmentor {
    config: SegmentationConfig,
}

impl ThresholdSegmentor {
    pub fn new(config: SegmentationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    fn extract_cells(&self, raster: &RasterStack, params: &ParameterSet) -> Vec<CompartmentSet> {
        let Some(nuc_plane) = nuclear_plane(raster, params) else {
            return Vec::new();
        };
        let width = raster.width();
        let height = raster.height();

        let nuc_intensity = corrected_intensity(nuc_plane, params);
        let nucleus_mask = BitBuffer2::from_fn(width, height, |i| {
            nuc_intensity[i] > params.threshold_nucleus
        });

        let mut labels = LabelMap::from_mask(&nucleus_mask, self.config.connectivity);
        if self.config.watershed && labels.num_labels() > 0 {
            labels = watershed::split_touching(&labels, &nuc_intensity, &self.config);
        }

        let components = labels.component_pixels();
        let total = components.len();
        let nuclei: Vec<Vec<usize>> = components
            .into_iter()
            .filter(|pixels| {
                pixels.len() >= self.config.min_nucleus_area
                    && self.config.max_nucleus_area.is_none_or(|max| pixels.len() <= max)
            })
            .collect();

        tracing::debug!(
            components = total,
            kept = nuclei.len(),
            "Nuclei labeled"
        );

        if nuclei.is_empty() {
            return Vec::new();
        }

        let kept_nuclei_mask = {
            let mut mask = BitBuffer2::new_default(width, height);
            for &idx in nuclei.iter().flatten() {
                mask.set(idx, true);
            }
            mask
        };

        let owner = match cytoplasm_plane(raster, params) {
            Some(cyto_plane) => {
                let cyto_intensity = corrected_intensity(cyto_plane, params);
                let cell_mask = BitBuffer2::from_fn(width, height, |i| {
                    cyto_intensity[i] > params.threshold_cell
                });
                region::grow_cell_bodies(
                    &nuclei,
                    &cell_mask,
                    self.config.connectivity,
                    self.config.max_cell_radius,
                )
            }
            // Without a cytoplasmic channel the whole cell is the nucleus.
            None => region::grow_cell_bodies(
                &nuclei,
                &BitBuffer2::new_default(width, height),
                self.config.connectivity,
                None,
            ),
        };

        let excluded = match params.annulus_size {
            Some(size) => dilate_mask(&kept_nuclei_mask, size as usize),
            None => kept_nuclei_mask,
        };

        let mut whole: Vec<Vec<usize>> = vec![Vec::new(); nuclei.len()];
        for (idx, &k) in owner.iter().enumerate() {
            if k != 0 {
                whole[k as usize - 1].push(idx);
            }
        }

        nuclei
            .iter()
            .zip(whole)
            .map(|(nucleus, whole)| {
                let cytoplasm: Vec<usize> =
                    whole.iter().copied().filter(|&i| !excluded.get(i)).collect();
                build_set(nucleus, &whole, &cytoplasm, width)
            })
            .collect()
    }

    /// One whole-field object per field.
    fn extract_field(&self, raster: &RasterStack, params: &ParameterSet) -> Vec<CompartmentSet> {
        let width = raster.width();
        let height = raster.height();

        let nucleus_mask = match nuclear_plane(raster, params) {
            Some(plane) => BitBuffer2::from_fn(width, height, |i| {
                params.corrected(plane[i]) > params.threshold_nucleus
            }),
            None => BitBuffer2::new_default(width, height),
        };

        let body_plane = cytoplasm_plane(raster, params).or_else(|| nuclear_plane(raster, params));
        let Some(body_plane) = body_plane else {
            return Vec::new();
        };
        let whole_mask =
            BitBuffer2::from_fn(width, height, |i| params.corrected(body_plane[i]) > 0.0);
        if whole_mask.count_ones() == 0 {
            return Vec::new();
        }

        let mut cytoplasm_mask = whole_mask.clone();
        cytoplasm_mask.subtract(&nucleus_mask);

        let nucleus: Vec<usize> = nucleus_mask.iter_ones().collect();
        let whole: Vec<usize> = whole_mask.iter_ones().collect();
        let cytoplasm: Vec<usize> = cytoplasm_mask.iter_ones().collect();
        vec![build_set(&nucleus, &whole, &cytoplasm, width)]
    }
}

impl Segmentor for ThresholdSegmentor {
    fn name(&self) -> &str {
        "threshold"
    }

    fn extract(&self, raster: &RasterStack, params: &ParameterSet) -> Result<Vec<CompartmentSet>> {
        params.validate()?;

        let sets = match params.process_type {
            ProcessType::Unprocessed => Vec::new(),
            ProcessType::SingleCell => self.extract_cells(raster, params),
            ProcessType::WellMean => self.extract_field(raster, params),
        };
        Ok(sets)
    }
}

/// Resident, non-empty nuclear plane.
fn nuclear_plane<'a>(raster: &'a RasterStack, params: &ParameterSet) -> Option<&'a Buffer2<u16>> {
    let channel = params.nuclear_channel.as_ref()?.resolve(raster)?;
    raster.plane(channel).filter(|p| !p.is_empty())
}

fn cytoplasm_plane<'a>(raster: &'a RasterStack, params: &ParameterSet) -> Option<&'a Buffer2<u16>> {
    let channel = params.cytoplasm_channel.as_ref()?.resolve(raster)?;
    raster.plane(channel).filter(|p| !p.is_empty())
}

fn corrected_intensity(plane: &Buffer2<u16>, params: &ParameterSet) -> Buffer2<f32> {
    let width = plane.width();
    let mut out = Buffer2::new_default(width, plane.height());
    out.pixels_mut()
        .par_chunks_mut(width.max(1))
        .zip(plane.pixels().par_chunks(width.max(1)))
        .for_each(|(dst, src)| {
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = params.corrected(s);
            }
        });
    out
}

fn to_points(indices: &[usize], width: usize) -> Vec<Point> {
    indices
        .iter()
        .map(|&i| Point::new((i % width) as u32, (i / width) as u32))
        .collect()
}

fn build_set(nucleus: &[usize], whole: &[usize], cytoplasm: &[usize], width: usize) -> CompartmentSet {
    let whole_points = to_points(whole, width);
    let bbox = CellCompartment::bounding_box(&whole_points);
    vec![
        CellCompartment::new(NUCLEUS, to_points(nucleus, width)),
        CellCompartment::new(WHOLE_CELL, whole_points),
        CellCompartment::new(CYTOPLASM, to_points(cytoplasm, width)),
        bbox,
    ]
}

static NEIGHBOR_OFFSETS: [(isize, isize); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (1, -1),
    (-1, 1),
    (1, 1),
];

/// In-bounds neighbors of a linear index.
#[inline]
pub(crate) fn neighbors(
    idx: usize,
    width: usize,
    height: usize,
    connectivity: Connectivity,
) -> impl Iterator<Item = usize> {
    let count = match connectivity {
        Connectivity::Four => 4,
        Connectivity::Eight => 8,
    };
    let x = (idx % width) as isize;
    let y = (idx / width) as isize;
    NEIGHBOR_OFFSETS[..count].iter().filter_map(move |&(dx, dy)| {
        let nx = x + dx;
        let ny = y + dy;
        (nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height)
            .then(|| ny as usize * width + nx as usize)
    })
}
