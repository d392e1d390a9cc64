//! Lazy conversion of plain images to pyramidal sidecar files.
//!
//! Sources the tile pipeline cannot serve directly (plain PNGs, JPEGs,
//! single-page TIFFs with deep bit depths) are converted once into a
//! pyramidal TIFF stored in a sidecar directory next to the source. The
//! converted file is then opened through the normal pyramid path. Conversion
//! is deduplicated per output path, so any number of concurrent requests for
//! the same unconverted slide run exactly one conversion.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::error::ConvertError;

// ============================================================================
// Constants
// ============================================================================

/// Name of the per-directory sidecar directory holding converted files.
pub const SIDECAR_DIR: &str = ".deepslide";

/// Pyramid levels are generated until both dimensions fit in this many pixels.
const LEVEL_FLOOR: u32 = 256;

/// Upper percentile used for contrast rescaling, as a fraction.
const RESCALE_PERCENTILE: f64 = 0.99;

// ============================================================================
// Sidecar layout
// ============================================================================

/// Sidecar output path for a source image.
///
/// The converted file lives in a hidden directory next to the source, named
/// after the source's stem: `dir/photo.png` converts to
/// `dir/.deepslide/photo.tif`.
pub fn sidecar_path(input: &Path) -> PathBuf {
    let parent = input.parent().unwrap_or_else(|| Path::new(""));
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    parent.join(SIDECAR_DIR).join(format!("{stem}.tif"))
}

// ============================================================================
// Converter
// ============================================================================

/// State of an in-flight conversion, shared between leader and waiters.
struct InFlightConvert {
    notify: Notify,
    result: Mutex<Option<Result<PathBuf, ConvertError>>>,
}

/// Deduplicating conversion front-end.
///
/// One instance is shared by the whole process. Each output path has at most
/// one conversion running; later callers for the same output wait on the
/// completion signal and share the first result.
pub struct Converter {
    in_flight: Mutex<HashMap<PathBuf, Arc<InFlightConvert>>>,
    completed: AtomicU64,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            completed: AtomicU64::new(0),
        }
    }

    /// Ensure the pyramidal sidecar for `input` exists, converting if needed.
    ///
    /// Returns the sidecar path. An already-present sidecar is returned
    /// without touching the source, which makes the operation idempotent
    /// across restarts.
    pub async fn ensure_converted(&self, input: &Path) -> Result<PathBuf, ConvertError> {
        let output = sidecar_path(input);
        if output.is_file() {
            return Ok(output);
        }

        let input = input.to_path_buf();
        loop {
            let state = {
                let mut in_flight = self.in_flight.lock().await;
                if let Some(state) = in_flight.get(&output) {
                    state.clone()
                } else {
                    let state = Arc::new(InFlightConvert {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    in_flight.insert(output.clone(), state.clone());
                    drop(in_flight);

                    let result = self.run_conversion(input.clone(), output.clone()).await;

                    *state.result.lock().await = Some(result.clone());
                    self.in_flight.lock().await.remove(&output);
                    state.notify.notify_waiters();

                    return result;
                }
            };

            // Register before checking the result slot so the leader's
            // notification cannot slip through unseen.
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let result = state.result.lock().await;
                if let Some(ref result) = *result {
                    return result.clone();
                }
            }
            notified.await;
            let result = state.result.lock().await;
            if let Some(ref result) = *result {
                return result.clone();
            }
        }
    }

    /// Number of conversions this instance has completed successfully.
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    async fn run_conversion(
        &self,
        input: PathBuf,
        output: PathBuf,
    ) -> Result<PathBuf, ConvertError> {
        // Re-check after winning the leader slot: a previous leader may have
        // finished between the caller's fast path and now.
        if output.is_file() {
            return Ok(output);
        }

        info!(input = %input.display(), output = %output.display(), "converting to pyramidal tiff");
        let job_output = output.clone();
        let result = tokio::task::spawn_blocking(move || convert_image(&input, &job_output))
            .await
            .map_err(|e| ConvertError::Io {
                path: output.clone(),
                message: format!("conversion task failed: {e}"),
            })?;

        if result.is_ok() {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
        result.map(|_| output)
    }
}

// ============================================================================
// Conversion pipeline
// ============================================================================

/// Convert a plain image into a pyramidal RGB TIFF at `output`.
///
/// The source is decoded in full, contrast-rescaled from its observed value
/// range to 8-bit, and written as a multi-page TIFF whose pages halve in
/// size down to the level floor. The file is written to a temporary name and
/// renamed into place so readers never observe a partial sidecar.
pub fn convert_image(input: &Path, output: &Path) -> Result<(), ConvertError> {
    let decoded = image::open(input).map_err(|e| ConvertError::Unreadable {
        path: input.to_path_buf(),
        message: e.to_string(),
    })?;

    let base = rescale_to_u8(&decoded.to_rgb16());
    let levels = build_levels(base);
    debug!(
        input = %input.display(),
        levels = levels.len(),
        width = levels[0].width(),
        height = levels[0].height(),
        "pyramid built"
    );

    if let Some(dir) = output.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConvertError::Io {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
    }

    let tmp = output.with_extension("tif.tmp");
    write_pyramid_tiff(&tmp, &levels, input).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        e
    })?;
    std::fs::rename(&tmp, output).map_err(|e| ConvertError::Io {
        path: output.to_path_buf(),
        message: e.to_string(),
    })?;

    Ok(())
}

/// Rescale 16-bit samples to 8-bit using the observed minimum and the upper
/// percentile of the sample distribution.
///
/// Scientific sources often use a narrow slice of the 16-bit range; mapping
/// min..p99 to 0..255 keeps them visible instead of near-black. Values above
/// the percentile clamp to white.
fn rescale_to_u8(source: &image::ImageBuffer<Rgb<u16>, Vec<u16>>) -> RgbImage {
    let samples = source.as_raw();

    let mut histogram = vec![0u64; 1 << 16];
    for &v in samples {
        histogram[v as usize] += 1;
    }

    let lo = samples.iter().copied().min().unwrap_or(0);
    let hi = percentile(&histogram, samples.len() as u64, RESCALE_PERCENTILE);
    let (lo, hi) = if hi > lo { (lo, hi) } else { (0, u16::MAX) };
    let span = (hi - lo) as f32;

    let (width, height) = source.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let Rgb([r, g, b]) = *source.get_pixel(x, y);
        let scale = |v: u16| {
            let scaled = (v.saturating_sub(lo) as f32 / span) * 255.0;
            scaled.clamp(0.0, 255.0).round() as u8
        };
        Rgb([scale(r), scale(g), scale(b)])
    })
}

/// Smallest sample value with at least `fraction` of the mass at or below it.
fn percentile(histogram: &[u64], total: u64, fraction: f64) -> u16 {
    if total == 0 {
        return u16::MAX;
    }
    let target = (total as f64 * fraction).ceil() as u64;
    let mut seen = 0u64;
    for (value, &count) in histogram.iter().enumerate() {
        seen += count;
        if seen >= target {
            return value as u16;
        }
    }
    u16::MAX
}

/// Halve the base image until both dimensions fit in the level floor.
fn build_levels(base: RgbImage) -> Vec<RgbImage> {
    let mut levels = vec![base];
    loop {
        let (w, h) = levels[levels.len() - 1].dimensions();
        if w <= LEVEL_FLOOR && h <= LEVEL_FLOOR {
            break;
        }
        let next = image::imageops::resize(
            &levels[levels.len() - 1],
            w.div_ceil(2).max(1),
            h.div_ceil(2).max(1),
            FilterType::Triangle,
        );
        levels.push(next);
    }
    levels
}

/// Write the level stack as a multi-page RGB TIFF, largest page first.
///
/// Pages are strip-organized rather than tiled: the only consumer of these
/// sidecars is [`crate::pyramid::TiffPyramid`], which decodes whole pages.
fn write_pyramid_tiff(path: &Path, levels: &[RgbImage], source: &Path) -> Result<(), ConvertError> {
    let file = File::create(path).map_err(|e| ConvertError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).map_err(|e| ConvertError::Encode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    for (index, level) in levels.iter().enumerate() {
        let mut page = encoder
            .new_image::<colortype::RGB8>(level.width(), level.height())
            .map_err(|e| ConvertError::Encode {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if index == 0 {
            let description = format!("converted from {}", source.display());
            page.encoder()
                .write_tag(Tag::ImageDescription, description.as_str())
                .map_err(|e| ConvertError::Encode {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
        }

        page.write_data(level.as_raw()).map_err(|e| ConvertError::Encode {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    }

    Ok(())
}
