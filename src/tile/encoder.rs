//! Encoding of rendered tiles into wire formats.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbaImage};

use crate::error::TileError;

/// Default JPEG quality used when the configuration does not override it.
pub const DEFAULT_TILE_QUALITY: u8 = 75;

// ============================================================================
// Tile format
// ============================================================================

/// Output encoding for served tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFormat {
    Jpeg,
    Png,
}

impl TileFormat {
    /// Parse a format name as it appears in URLs and configuration.
    pub fn parse(name: &str) -> Result<Self, TileError> {
        match name.to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(TileError::UnsupportedFormat {
                format: other.to_string(),
            }),
        }
    }

    /// MIME type for HTTP responses.
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }

    /// Canonical extension, as used in deep-zoom descriptors and tile URLs.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Stateless tile encoder.
#[derive(Debug, Clone)]
pub struct TileEncoder {
    quality: u8,
}

impl TileEncoder {
    /// Create an encoder with the given JPEG quality (clamped to 1..=100).
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    /// Encode a rendered tile into the requested format.
    pub fn encode(&self, tile: &RgbaImage, format: TileFormat) -> Result<Bytes, TileError> {
        let mut out = Vec::new();
        match format {
            TileFormat::Jpeg => {
                // JPEG has no alpha channel; flatten first.
                let rgb = image::DynamicImage::ImageRgba8(tile.clone()).to_rgb8();
                JpegEncoder::new_with_quality(&mut out, self.quality)
                    .write_image(
                        rgb.as_raw(),
                        rgb.width(),
                        rgb.height(),
                        ExtendedColorType::Rgb8,
                    )
                    .map_err(|e| TileError::Encode {
                        message: e.to_string(),
                    })?;
            }
            TileFormat::Png => {
                PngEncoder::new(&mut out)
                    .write_image(
                        tile.as_raw(),
                        tile.width(),
                        tile.height(),
                        ExtendedColorType::Rgba8,
                    )
                    .map_err(|e| TileError::Encode {
                        message: e.to_string(),
                    })?;
            }
        }
        Ok(Bytes::from(out))
    }
}

impl Default for TileEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_QUALITY)
    }
}
