//! Synthetic rasters and fixtures for tests.

#![allow(dead_code)]

use std::path::Path;

use common::Buffer2;

use crate::raster::RasterStack;

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times. Respects RUST_LOG, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Plane of constant `background` intensity.
pub fn flat_plane(width: usize, height: usize, background: u16) -> Buffer2<u16> {
    Buffer2::new_filled(width, height, background)
}

/// Sets an axis-aligned rectangle to `value`.
pub fn fill_rect(plane: &mut Buffer2<u16>, x0: usize, y0: usize, w: usize, h: usize, value: u16) {
    for y in y0..(y0 + h).min(plane.height()) {
        for x in x0..(x0 + w).min(plane.width()) {
            plane[(x, y)] = value;
        }
    }
}

/// Sets a filled disk to `value` and returns the number of pixels written.
pub fn fill_disk(plane: &mut Buffer2<u16>, cx: usize, cy: usize, radius: usize, value: u16) -> usize {
    let r2 = (radius * radius) as i64;
    let mut count = 0;
    for y in 0..plane.height() {
        for x in 0..plane.width() {
            let dx = x as i64 - cx as i64;
            let dy = y as i64 - cy as i64;
            if dx * dx + dy * dy <= r2 {
                plane[(x, y)] = value;
                count += 1;
            }
        }
    }
    count
}

/// Adds a cone-shaped peak (brightest at the center) clipped to `radius`.
pub fn add_peak(plane: &mut Buffer2<u16>, cx: usize, cy: usize, radius: usize, peak: u16) {
    let r = radius as f32;
    for y in 0..plane.height() {
        for x in 0..plane.width() {
            let dx = x as f32 - cx as f32;
            let dy = y as f32 - cy as f32;
            let d = (dx * dx + dy * dy).sqrt();
            if d <= r {
                let v = (peak as f32 * (1.0 - d / (r + 1.0))) as u16;
                let px = &mut plane[(x, y)];
                *px = (*px).max(v);
            }
        }
    }
}

/// Two separated 5x5 nuclei (25 pixels each) inside 9x9 cell bodies on a
/// 40x20 field with background 100.
///
/// Channels: `DAPI` (nuclei at 1100) and `GFP` (cell bodies at 600).
pub fn two_cell_raster() -> RasterStack {
    let mut dapi = flat_plane(40, 20, 100);
    fill_rect(&mut dapi, 5, 7, 5, 5, 1100);
    fill_rect(&mut dapi, 25, 7, 5, 5, 1100);

    let mut gfp = flat_plane(40, 20, 100);
    fill_rect(&mut gfp, 3, 5, 9, 9, 600);
    fill_rect(&mut gfp, 23, 5, 9, 9, 600);

    RasterStack::from_planes(vec![dapi, gfp], vec!["DAPI".into(), "GFP".into()])
        .expect("synthetic raster is valid")
}

/// Same layout as [`two_cell_raster`] but the second nucleus is 3x3
/// (9 pixels), so nucleus sizes differ between the two cells.
pub fn uneven_cell_raster() -> RasterStack {
    let mut dapi = flat_plane(40, 20, 100);
    fill_rect(&mut dapi, 5, 7, 5, 5, 1100);
    fill_rect(&mut dapi, 26, 8, 3, 3, 1100);

    let mut gfp = flat_plane(40, 20, 100);
    fill_rect(&mut gfp, 3, 5, 9, 9, 600);
    fill_rect(&mut gfp, 23, 5, 9, 9, 600);

    RasterStack::from_planes(vec![dapi, gfp], vec!["DAPI".into(), "GFP".into()])
        .expect("synthetic raster is valid")
}

pub fn write_gray16_tiff(path: &Path, plane: &Buffer2<u16>) {
    use tiff::encoder::{TiffEncoder, colortype};

    let file = std::fs::File::create(path).expect("create tiff");
    let mut encoder = TiffEncoder::new(file).expect("tiff encoder");
    encoder
        .write_image::<colortype::Gray16>(plane.width() as u32, plane.height() as u32, plane.pixels())
        .expect("write tiff");
}

pub fn write_gray8_tiff(path: &Path, width: usize, height: usize, pixels: &[u8]) {
    use tiff::encoder::{TiffEncoder, colortype};

    let file = std::fs::File::create(path).expect("create tiff");
    let mut encoder = TiffEncoder::new(file).expect("tiff encoder");
    encoder
        .write_image::<colortype::Gray8>(width as u32, height as u32, pixels)
        .expect("write tiff");
}

pub fn write_rgb8_tiff(path: &Path, width: usize, height: usize) {
    use tiff::encoder::{TiffEncoder, colortype};

    let file = std::fs::File::create(path).expect("create tiff");
    let mut encoder = TiffEncoder::new(file).expect("tiff encoder");
    let pixels = vec![0u8; width * height * 3];
    encoder
        .write_image::<colortype::RGB8>(width as u32, height as u32, &pixels)
        .expect("write tiff");
}
