//! An opened slide: deep-zoom generator, associated images, and metadata.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::RgbaImage;
use tracing::debug;

use crate::error::{OpenError, TileError};
use crate::pyramid::{DeepZoom, FlatImage, PyramidImage, SlideMetadata, TiffPyramid, TilingOptions};

/// Microns per centimetre, for resolution-tag fallback.
const MICRONS_PER_CM: f64 = 10_000.0;

/// Microns per inch, for resolution-tag fallback.
const MICRONS_PER_INCH: f64 = 25_400.0;

/// Result of a single open attempt.
///
/// `Unsupported` is the only outcome that triggers the conversion fallback;
/// structural failures surface as errors so unrelated breakage is never
/// silently treated as "needs conversion".
pub enum OpenOutcome {
    Opened(Arc<SlideHandle>),
    Unsupported,
    NotFound,
}

/// One opened pyramid image plus everything derived from it.
///
/// Created by the slide cache on first successful open; shared via `Arc` so
/// in-flight callers keep a valid handle across eviction. Resources release
/// when the last reference drops.
pub struct SlideHandle {
    path: PathBuf,
    deepzoom: DeepZoom,
    /// Auxiliary images wrapped as their own single-level generators.
    associated: BTreeMap<String, DeepZoom>,
    properties: BTreeMap<String, String>,
    mpp: f64,
    /// Serializes tile extraction on the main pyramid; the underlying
    /// decoder is stateful and not safe for concurrent region reads.
    /// Associated images are fully decoded and need no lock.
    tile_lock: Mutex<()>,
}

impl std::fmt::Debug for SlideHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlideHandle")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SlideHandle {
    /// Path this handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Display name of the slide file.
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }

    /// Microns per pixel at full resolution, `0.0` when unknown.
    ///
    /// Unknown scale is not an error; viewers display it as such.
    pub fn mpp(&self) -> f64 {
        self.mpp
    }

    /// Source properties for display.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Names of the slide's associated images.
    pub fn associated_names(&self) -> Vec<String> {
        self.associated.keys().cloned().collect()
    }

    /// Metadata document for the main pyramid.
    pub fn metadata(&self, tile_format: &str) -> SlideMetadata {
        self.deepzoom.metadata(tile_format)
    }

    /// Metadata document for one associated image.
    pub fn associated_metadata(
        &self,
        name: &str,
        tile_format: &str,
    ) -> Result<SlideMetadata, TileError> {
        self.associated
            .get(name)
            .map(|dz| dz.metadata(tile_format))
            .ok_or_else(|| TileError::UnknownAssociatedImage {
                name: name.to_string(),
            })
    }

    /// Produce one tile from the main pyramid.
    pub fn tile(&self, level: usize, col: u32, row: u32) -> Result<RgbaImage, TileError> {
        let _guard = self.tile_lock.lock().expect("tile lock");
        self.deepzoom.tile(level, col, row)
    }

    /// Produce one tile from an associated image.
    pub fn associated_tile(
        &self,
        name: &str,
        level: usize,
        col: u32,
        row: u32,
    ) -> Result<RgbaImage, TileError> {
        let dz = self
            .associated
            .get(name)
            .ok_or_else(|| TileError::UnknownAssociatedImage {
                name: name.to_string(),
            })?;
        dz.tile(level, col, row)
    }
}

/// Attempt to open a slide at `path` as a pyramid image.
///
/// Returns the typed outcome: a handle, `Unsupported` for files without a
/// servable pyramid container, or `NotFound` for files that vanished since
/// path resolution. Structural and I/O failures are hard errors.
pub fn open_slide(path: &Path, options: TilingOptions) -> Result<OpenOutcome, OpenError> {
    let pyramid = match TiffPyramid::open(path) {
        Ok(p) => p,
        Err(OpenError::Unsupported { .. }) => return Ok(OpenOutcome::Unsupported),
        Err(OpenError::NotFound { .. }) => return Ok(OpenOutcome::NotFound),
        Err(e) => return Err(e),
    };

    let source: Arc<dyn PyramidImage> = Arc::new(pyramid);

    let mut associated = BTreeMap::new();
    for name in source.associated_names() {
        match source.associated_image(&name) {
            Ok(pixels) => {
                let flat: Arc<dyn PyramidImage> = Arc::new(FlatImage::from_rgba(pixels));
                associated.insert(name, DeepZoom::new(flat, options));
            }
            Err(e) => {
                // A broken label page should not make the slide unservable.
                debug!(path = %path.display(), name, error = %e, "skipping associated image");
            }
        }
    }

    let properties = source.properties().clone();
    let mpp = microns_per_pixel(&properties);

    Ok(OpenOutcome::Opened(Arc::new(SlideHandle {
        path: path.to_path_buf(),
        deepzoom: DeepZoom::new(source, options),
        associated,
        properties,
        mpp,
        tile_lock: Mutex::new(()),
    })))
}

/// Derive microns-per-pixel from source properties.
///
/// Fallback order: direct MPP properties, then resolution tags with their
/// unit (pixels per centimetre or per inch), then `0.0` for unknown.
pub fn microns_per_pixel(properties: &BTreeMap<String, String>) -> f64 {
    // Direct scanner metadata.
    if let Some(mpp) = properties.get("aperio.MPP").and_then(|v| v.parse::<f64>().ok()) {
        if mpp > 0.0 {
            return mpp;
        }
    }
    if let (Some(x), Some(y)) = (
        parse_property(properties, "openslide.mpp-x"),
        parse_property(properties, "openslide.mpp-y"),
    ) {
        return (x + y) / 2.0;
    }

    // Resolution tags: pixels per unit -> microns per pixel.
    if let (Some(xres), Some(yres)) = (
        parse_property(properties, "tiff.XResolution"),
        parse_property(properties, "tiff.YResolution"),
    ) {
        if xres > 0.0 && yres > 0.0 {
            let numerator = match properties.get("tiff.ResolutionUnit").map(String::as_str) {
                Some("centimetre") => MICRONS_PER_CM,
                _ => MICRONS_PER_INCH,
            };
            return (numerator / xres + numerator / yres) / 2.0;
        }
    }

    0.0
}

fn parse_property(properties: &BTreeMap<String, String>, key: &str) -> Option<f64> {
    properties.get(key).and_then(|v| v.parse().ok())
}
