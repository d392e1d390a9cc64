//! The pyramid image capability and the single-level implementation.

use std::collections::BTreeMap;

use image::{DynamicImage, RgbaImage};

use crate::error::TileError;

/// An opened multi-resolution image.
///
/// Level 0 is the highest resolution; levels increase toward the smallest.
/// Implementations own their decode state; callers serialize tile extraction
/// on a single instance (some decoders are stateful), but distinct instances
/// may be used fully in parallel.
pub trait PyramidImage: Send + Sync {
    /// Number of stored resolution levels (always >= 1).
    fn level_count(&self) -> usize;

    /// Pixel dimensions of a level, or `None` when the level does not exist.
    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)>;

    /// Dimensions of the full-resolution image.
    fn dimensions(&self) -> (u32, u32) {
        self.level_dimensions(0).unwrap_or((0, 0))
    }

    /// Downsample factor of a level relative to level 0.
    fn level_downsample(&self, level: usize) -> Option<f64> {
        let (w0, _) = self.dimensions();
        let (wl, _) = self.level_dimensions(level)?;
        if wl == 0 {
            return None;
        }
        Some(w0 as f64 / wl as f64)
    }

    /// Read a pixel region from a level. Coordinates are in level pixels and
    /// are clamped to the level bounds by the implementation.
    fn read_region(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, TileError>;

    /// String properties surfaced from the source, for display.
    fn properties(&self) -> &BTreeMap<String, String>;

    /// Names of auxiliary images embedded in the source (label, macro, ...).
    fn associated_names(&self) -> Vec<String> {
        Vec::new()
    }

    /// Decode one auxiliary image in full.
    fn associated_image(&self, _name: &str) -> Result<RgbaImage, TileError> {
        Err(TileError::UnknownAssociatedImage {
            name: _name.to_string(),
        })
    }
}

/// A plain decoded image exposed as a one-level pyramid.
///
/// This fills the role the original stack gives small non-pyramidal images:
/// everything is resident in memory and regions are plain crops.
pub struct FlatImage {
    pixels: RgbaImage,
    properties: BTreeMap<String, String>,
}

impl FlatImage {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            pixels: image.to_rgba8(),
            properties: BTreeMap::new(),
        }
    }

    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self {
            pixels,
            properties: BTreeMap::new(),
        }
    }
}

impl PyramidImage for FlatImage {
    fn level_count(&self) -> usize {
        1
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        (level == 0).then(|| self.pixels.dimensions())
    }

    fn read_region(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, TileError> {
        if level != 0 {
            return Err(TileError::InvalidLevel {
                level,
                level_count: 1,
            });
        }
        Ok(crop_clamped(&self.pixels, x, y, width, height))
    }

    fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

/// Crop a region, clamping it to the image bounds.
pub(crate) fn crop_clamped(image: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> RgbaImage {
    let (iw, ih) = image.dimensions();
    let x = x.min(iw.saturating_sub(1));
    let y = y.min(ih.saturating_sub(1));
    let w = width.min(iw - x).max(1);
    let h = height.min(ih - y).max(1);
    image::imageops::crop_imm(image, x, y, w, h).to_image()
}
