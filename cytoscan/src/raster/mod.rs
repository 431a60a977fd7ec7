//! Multi-channel intensity rasters for one acquisition field.

mod background;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use common::Buffer2;
use rayon::prelude::*;
use tiff::ColorType;
use tiff::decoder::{Decoder, DecodingResult};

use crate::error::{Error, Result};

pub use background::{BackgroundMethod, MAD_TO_SIGMA};

/// Channel planes of one field plus a cached background level per channel.
///
/// All planes share the same dimensions. Pixel buffers can be released to
/// reclaim memory; dimensions, channel names and backgrounds survive.
#[derive(Debug, Clone)]
pub struct RasterStack {
    width: usize,
    height: usize,
    channel_names: Vec<String>,
    planes: Option<Vec<Buffer2<u16>>>,
    background: Vec<f32>,
}

impl RasterStack {
    /// Decodes one grayscale TIFF per channel.
    pub fn load<P: AsRef<Path>>(channel_files: &[P], channel_names: &[String]) -> Result<Self> {
        Self::load_with(channel_files, channel_names, BackgroundMethod::default())
    }

    pub fn load_with<P: AsRef<Path>>(
        channel_files: &[P],
        channel_names: &[String],
        method: BackgroundMethod,
    ) -> Result<Self> {
        if channel_files.len() != channel_names.len() {
            return Err(Error::InvalidParameter(format!(
                "{} channel files given for {} channel names",
                channel_files.len(),
                channel_names.len()
            )));
        }

        let mut planes: Vec<Buffer2<u16>> = Vec::with_capacity(channel_files.len());
        for path in channel_files {
            let path = path.as_ref();
            let plane = read_gray_tiff(path)?;
            if let Some(first) = planes.first()
                && first.dimensions() != plane.dimensions()
            {
                return Err(Error::image_format(
                    path,
                    format!(
                        "dimensions {:?} differ from first channel {:?}",
                        plane.dimensions(),
                        first.dimensions()
                    ),
                ));
            }
            planes.push(plane);
        }

        tracing::debug!(
            channels = planes.len(),
            "Loaded field from {}",
            channel_files
                .first()
                .map(|p| p.as_ref().display().to_string())
                .unwrap_or_default()
        );

        Self::from_planes_with(planes, channel_names.to_vec(), method)
    }

    /// Builds a stack from in-memory planes.
    pub fn from_planes(planes: Vec<Buffer2<u16>>, channel_names: Vec<String>) -> Result<Self> {
        Self::from_planes_with(planes, channel_names, BackgroundMethod::default())
    }

    pub fn from_planes_with(
        planes: Vec<Buffer2<u16>>,
        channel_names: Vec<String>,
        method: BackgroundMethod,
    ) -> Result<Self> {
        method.validate()?;
        if planes.is_empty() {
            return Err(Error::InvalidParameter("raster needs at least one channel".into()));
        }
        if planes.len() != channel_names.len() {
            return Err(Error::InvalidParameter(format!(
                "{} planes given for {} channel names",
                planes.len(),
                channel_names.len()
            )));
        }

        let (width, height) = planes[0].dimensions();
        for (plane, name) in planes.iter().zip(&channel_names) {
            if plane.dimensions() != (width, height) {
                return Err(Error::image_format(
                    PathBuf::from(name),
                    format!(
                        "dimensions {:?} differ from first channel {:?}",
                        plane.dimensions(),
                        (width, height)
                    ),
                ));
            }
        }

        let background = planes
            .par_iter()
            .map(|plane| method.estimate(plane.pixels()))
            .collect::<Result<Vec<f32>>>()?;

        Ok(Self {
            width,
            height,
            channel_names,
            planes: Some(planes),
            background,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channel_names.len()
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channel_names.iter().position(|n| n == name)
    }

    /// Pixel plane of a channel, `None` when released or out of range.
    pub fn plane(&self, channel: usize) -> Option<&Buffer2<u16>> {
        self.planes.as_ref().and_then(|planes| planes.get(channel))
    }

    /// Cached background level of a channel.
    pub fn background(&self, channel: usize) -> Option<f32> {
        self.background.get(channel).copied()
    }

    pub fn backgrounds(&self) -> &[f32] {
        &self.background
    }

    /// Re-estimates one channel's background with an explicit method.
    pub fn estimate_background(&self, channel: usize, method: BackgroundMethod) -> Result<f32> {
        let plane = self.plane(channel).ok_or_else(|| {
            Error::InvalidParameter(format!("channel {channel} is not resident"))
        })?;
        method.estimate(plane.pixels())
    }

    /// Drops pixel buffers. Calling it again is a no-op.
    pub fn release(&mut self) {
        if self.planes.take().is_some() {
            tracing::trace!(width = self.width, height = self.height, "Raster released");
        }
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.planes.is_none()
    }
}

/// Reads the first page of a single-sample 8 or 16 bit grayscale TIFF.
fn read_gray_tiff(path: &Path) -> Result<Buffer2<u16>> {
    let file = File::open(path).map_err(|e| Error::image_format(path, e))?;
    let mut decoder = Decoder::new(BufReader::new(file)).map_err(|e| Error::image_format(path, e))?;

    let color_type = decoder.colortype().map_err(|e| Error::image_format(path, e))?;
    if !matches!(color_type, ColorType::Gray(8) | ColorType::Gray(16)) {
        return Err(Error::image_format(
            path,
            format!("unsupported color type {color_type:?}, expected 8 or 16 bit grayscale"),
        ));
    }

    let (width, height) = decoder.dimensions().map_err(|e| Error::image_format(path, e))?;
    let pixels: Vec<u16> = match decoder.read_image().map_err(|e| Error::image_format(path, e))? {
        DecodingResult::U8(buf) => buf.into_iter().map(u16::from).collect(),
        DecodingResult::U16(buf) => buf,
        _ => {
            return Err(Error::image_format(path, "unexpected sample format"));
        }
    };

    let (width, height) = (width as usize, height as usize);
    if pixels.len() != width * height {
        return Err(Error::image_format(
            path,
            format!(
                "decoded {} samples for a {width}x{height} image",
                pixels.len()
            ),
        ));
    }

    Ok(Buffer2::new(width, height, pixels))
}
