//! Deep Zoom addressing over a pyramid source.
//!
//! Deep Zoom numbers levels from 0 (a 1x1 pixel image) up to
//! `ceil(log2(max(width, height)))` (full resolution), the inverse of the
//! WSI convention where level 0 is full resolution. Each level is cut into
//! `tile_size` tiles with `overlap` extra pixels on interior edges. A tile
//! request maps its Deep Zoom level to the stored pyramid level with the
//! closest usable resolution, reads the region, and resizes to the exact
//! tile dimensions.

use std::sync::Arc;

use image::imageops::FilterType;
use image::RgbaImage;
use serde::Serialize;

use crate::error::TileError;

use super::image::PyramidImage;

/// Tiling options applied to every generator the server creates.
#[derive(Debug, Clone, Copy)]
pub struct TilingOptions {
    /// Tile edge length in pixels.
    pub tile_size: u32,
    /// Overlap pixels added on interior tile edges.
    pub overlap: u32,
    /// Whether viewers should treat the pyramid as cropped to its
    /// non-empty bounds. Carried through to the metadata document.
    pub limit_bounds: bool,
}

impl Default for TilingOptions {
    fn default() -> Self {
        Self {
            tile_size: 254,
            overlap: 1,
            limit_bounds: true,
        }
    }
}

/// Metadata document for one pyramid, serialized by the HTTP layer.
#[derive(Debug, Clone, Serialize)]
pub struct SlideMetadata {
    pub tile_format: String,
    pub tile_overlap: u32,
    pub tile_size: u32,
    pub bounds_limited: bool,
    pub level_count: usize,
    /// Deep Zoom level dimensions, smallest level first.
    pub level_dimensions: Vec<(u32, u32)>,
}

/// Deep Zoom tile generator over an opened pyramid source.
pub struct DeepZoom {
    source: Arc<dyn PyramidImage>,
    options: TilingOptions,
    max_level: usize,
    /// Downsample per stored source level, level 0 first.
    source_downsamples: Vec<f64>,
}

impl DeepZoom {
    pub fn new(source: Arc<dyn PyramidImage>, options: TilingOptions) -> Self {
        let (width, height) = source.dimensions();
        let max_level = max_deepzoom_level(width, height);
        let source_downsamples = (0..source.level_count())
            .map(|l| source.level_downsample(l).unwrap_or(1.0))
            .collect();
        Self {
            source,
            options,
            max_level,
            source_downsamples,
        }
    }

    /// Number of Deep Zoom levels (`max_level + 1`).
    pub fn level_count(&self) -> usize {
        self.max_level + 1
    }

    /// Full-resolution dimensions.
    pub fn dimensions(&self) -> (u32, u32) {
        self.source.dimensions()
    }

    /// Dimensions of one Deep Zoom level.
    pub fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        if level > self.max_level {
            return None;
        }
        let (width, height) = self.source.dimensions();
        let scale = 1u64 << (self.max_level - level);
        Some((
            (width as u64).div_ceil(scale).max(1) as u32,
            (height as u64).div_ceil(scale).max(1) as u32,
        ))
    }

    /// Tile grid (columns, rows) of one level.
    pub fn level_tiles(&self, level: usize) -> Option<(u32, u32)> {
        let (width, height) = self.level_dimensions(level)?;
        Some((
            width.div_ceil(self.options.tile_size).max(1),
            height.div_ceil(self.options.tile_size).max(1),
        ))
    }

    /// Properties surfaced from the underlying source.
    pub fn source(&self) -> &Arc<dyn PyramidImage> {
        &self.source
    }

    /// Build the metadata document for this pyramid.
    pub fn metadata(&self, tile_format: &str) -> SlideMetadata {
        SlideMetadata {
            tile_format: tile_format.to_string(),
            tile_overlap: self.options.overlap,
            tile_size: self.options.tile_size,
            bounds_limited: self.options.limit_bounds,
            level_count: self.level_count(),
            level_dimensions: (0..self.level_count())
                .filter_map(|l| self.level_dimensions(l))
                .collect(),
        }
    }

    /// Produce the pixels of one tile.
    ///
    /// Validates `(level, col, row)` against the pyramid geometry, reads the
    /// backing region from the best stored level, and resizes to the exact
    /// Deep Zoom tile dimensions.
    pub fn tile(&self, level: usize, col: u32, row: u32) -> Result<RgbaImage, TileError> {
        let (level_width, level_height) =
            self.level_dimensions(level).ok_or(TileError::InvalidLevel {
                level,
                level_count: self.level_count(),
            })?;
        let (cols, rows) = self.level_tiles(level).expect("level validated");
        if col >= cols || row >= rows {
            return Err(TileError::TileOutOfBounds {
                level,
                col,
                row,
                cols,
                rows,
            });
        }

        let TilingOptions {
            tile_size, overlap, ..
        } = self.options;

        // Tile bounds in level pixels, with overlap on interior edges.
        let x0 = (col * tile_size).saturating_sub(if col > 0 { overlap } else { 0 });
        let y0 = (row * tile_size).saturating_sub(if row > 0 { overlap } else { 0 });
        let left_overlap = if col > 0 { overlap } else { 0 };
        let top_overlap = if row > 0 { overlap } else { 0 };
        let right_overlap = if col < cols - 1 { overlap } else { 0 };
        let bottom_overlap = if row < rows - 1 { overlap } else { 0 };
        let tile_width =
            (tile_size + left_overlap + right_overlap).min(level_width - x0);
        let tile_height =
            (tile_size + top_overlap + bottom_overlap).min(level_height - y0);

        // Map the Deep Zoom level to the best stored level: the highest
        // resolution whose downsample does not exceed the requested one.
        let dz_downsample = (1u64 << (self.max_level - level)) as f64;
        let (source_level, source_downsample) = self.best_source_level(dz_downsample);
        let scale = dz_downsample / source_downsample;

        let sx = (x0 as f64 * scale).floor() as u32;
        let sy = (y0 as f64 * scale).floor() as u32;
        let sw = (tile_width as f64 * scale).ceil().max(1.0) as u32;
        let sh = (tile_height as f64 * scale).ceil().max(1.0) as u32;

        let region = self.source.read_region(source_level, sx, sy, sw, sh)?;
        if region.dimensions() == (tile_width, tile_height) {
            Ok(region)
        } else {
            Ok(image::imageops::resize(
                &region,
                tile_width,
                tile_height,
                FilterType::Lanczos3,
            ))
        }
    }

    /// Stored level with the largest downsample not exceeding the target.
    fn best_source_level(&self, target_downsample: f64) -> (usize, f64) {
        let mut best = (0usize, self.source_downsamples[0]);
        for (level, &downsample) in self.source_downsamples.iter().enumerate() {
            if downsample <= target_downsample && downsample >= best.1 {
                best = (level, downsample);
            }
        }
        best
    }
}

/// `ceil(log2(max(width, height)))`, the index of the full-resolution level.
pub(crate) fn max_deepzoom_level(width: u32, height: u32) -> usize {
    let max_dim = width.max(height).max(1) as f64;
    if max_dim <= 1.0 {
        return 0;
    }
    max_dim.log2().ceil() as usize
}
