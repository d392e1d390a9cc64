//! Test utilities for integration tests.
//!
//! Helpers for writing pyramidal TIFF fixtures and plain-image sources into
//! a temporary served root, and for building the application router.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use axum::Router;
use image::{Luma, Rgb, RgbImage};
use tiff::encoder::{colortype, Rational, TiffEncoder};
use tiff::tags::Tag;

use deepslide::pyramid::TilingOptions;
use deepslide::server::{create_router, AppState, RouterConfig};
use deepslide::tile::TileFormat;

// =============================================================================
// Fixture Images
// =============================================================================

/// Deterministic RGB gradient so decoded tiles carry recognizable content.
pub fn gradient_rgb(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
}

/// Write a pyramidal multi-page RGB TIFF slide at `path`.
///
/// Pages halve in both dimensions from `width`x`height` down to 256 pixels,
/// matching the layout the conversion pipeline produces. The base page
/// carries resolution tags (40000 pixels/cm, 0.25 microns per pixel) so
/// metadata fallbacks are exercised.
pub fn write_pyramid_slide(path: &Path, width: u32, height: u32) {
    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).unwrap();

    let (mut w, mut h) = (width, height);
    let mut first = true;
    loop {
        let level = image::imageops::resize(
            &gradient_rgb(width, height),
            w,
            h,
            image::imageops::FilterType::Triangle,
        );
        let mut page = encoder.new_image::<colortype::RGB8>(w, h).unwrap();
        if first {
            page.encoder()
                .write_tag(Tag::XResolution, Rational { n: 40000, d: 1 })
                .unwrap();
            page.encoder()
                .write_tag(Tag::YResolution, Rational { n: 40000, d: 1 })
                .unwrap();
            page.encoder().write_tag(Tag::ResolutionUnit, 3u16).unwrap();
            first = false;
        }
        page.write_data(level.as_raw()).unwrap();

        if w <= 256 && h <= 256 {
            break;
        }
        w = w.div_ceil(2).max(1);
        h = h.div_ceil(2).max(1);
    }
}

/// Write a plain (non-pyramidal) PNG source at `path`.
pub fn write_plain_png(path: &Path, width: u32, height: u32) {
    gradient_rgb(width, height).save(path).unwrap();
}

/// Write a 16-bit grayscale PNG with a narrow value range.
pub fn write_deep_png(path: &Path, width: u32, height: u32) {
    let img = image::ImageBuffer::from_fn(width, height, |x, _| {
        Luma([2000u16 + (x % 64) as u16 * 30])
    });
    img.save(path).unwrap();
}

// =============================================================================
// Application Setup
// =============================================================================

/// Application state over `root` with test-friendly settings.
pub fn test_state(root: &Path) -> AppState {
    AppState::new(
        root.to_path_buf(),
        4,
        TilingOptions::default(),
        TileFormat::Jpeg,
        75,
    )
    .with_cache_max_age(3600)
}

/// Full router over `root`, tracing disabled.
pub fn test_router(root: &Path) -> Router {
    create_router(test_state(root), RouterConfig::new().with_tracing(false))
}

// =============================================================================
// Assertions
// =============================================================================

/// Check JPEG SOI marker.
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() > 2 && data[0] == 0xFF && data[1] == 0xD8
}

/// Check PNG signature.
pub fn is_valid_png(data: &[u8]) -> bool {
    data.starts_with(b"\x89PNG")
}
