//! Configuration management.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `DEEPSLIDE_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Environment Variables
//!
//! All configuration options can be set via environment variables with the
//! `DEEPSLIDE_` prefix:
//!
//! - `DEEPSLIDE_ROOT` - Directory of slides to serve (required)
//! - `DEEPSLIDE_HOST` - Server bind address (default: 0.0.0.0)
//! - `DEEPSLIDE_PORT` - Server port (default: 5000)
//! - `DEEPSLIDE_TILE_SIZE` - Deep Zoom tile size (default: 254)
//! - `DEEPSLIDE_OVERLAP` - Tile overlap in pixels (default: 1)
//! - `DEEPSLIDE_TILE_FORMAT` - Tile encoding, jpeg or png (default: jpeg)
//! - `DEEPSLIDE_TILE_QUALITY` - JPEG quality 1-100 (default: 75)
//! - `DEEPSLIDE_CACHE_SLIDES` - Max open slides to cache (default: 10)
//! - `DEEPSLIDE_FOLDER_DEPTH` - Max directory listing depth (default: 4)
//! - `DEEPSLIDE_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 1209600)
//! - `DEEPSLIDE_CORS_ORIGINS` - Allowed CORS origins (comma-separated)

use std::path::PathBuf;

use clap::Parser;

use crate::listing::DEFAULT_FOLDER_DEPTH;
use crate::pyramid::TilingOptions;
use crate::slide::DEFAULT_SLIDE_CACHE_CAPACITY;
use crate::tile::{TileFormat, DEFAULT_TILE_QUALITY};

// ============================================================================
// Default Values
// ============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default Deep Zoom tile size.
pub const DEFAULT_TILE_SIZE: u32 = 254;

/// Default tile overlap in pixels.
pub const DEFAULT_OVERLAP: u32 = 1;

/// Default HTTP cache max-age in seconds (two weeks).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 1_209_600;

// ============================================================================
// CLI Arguments
// ============================================================================

/// deepslide - a Deep Zoom tile server for local slide images.
///
/// Serves pyramidal slide images from a local directory as Deep Zoom tiles,
/// converting plain images into servable pyramids on first access.
#[derive(Parser, Debug, Clone)]
#[command(name = "deepslide")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // ========================================================================
    // Server Configuration
    // ========================================================================
    /// Directory of slide images to serve.
    #[arg(env = "DEEPSLIDE_ROOT")]
    pub root: PathBuf,

    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "DEEPSLIDE_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "DEEPSLIDE_PORT")]
    pub port: u16,

    // ========================================================================
    // Tiling Configuration
    // ========================================================================
    /// Deep Zoom tile size in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "DEEPSLIDE_TILE_SIZE")]
    pub tile_size: u32,

    /// Overlap pixels added on interior tile edges.
    #[arg(long, default_value_t = DEFAULT_OVERLAP, env = "DEEPSLIDE_OVERLAP")]
    pub overlap: u32,

    /// Advertise pyramids as cropped to their non-empty bounds.
    #[arg(long, default_value_t = true, env = "DEEPSLIDE_LIMIT_BOUNDS")]
    pub limit_bounds: bool,

    /// Tile encoding format (jpeg or png).
    #[arg(long, default_value = "jpeg", env = "DEEPSLIDE_TILE_FORMAT")]
    pub tile_format: String,

    /// JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_TILE_QUALITY, env = "DEEPSLIDE_TILE_QUALITY")]
    pub tile_quality: u8,

    // ========================================================================
    // Cache Configuration
    // ========================================================================
    /// Maximum number of open slides to keep in cache.
    #[arg(long, default_value_t = DEFAULT_SLIDE_CACHE_CAPACITY, env = "DEEPSLIDE_CACHE_SLIDES")]
    pub cache_slides: usize,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "DEEPSLIDE_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    // ========================================================================
    // Listing Configuration
    // ========================================================================
    /// Maximum directory depth for the tree listing.
    #[arg(long, default_value_t = DEFAULT_FOLDER_DEPTH, env = "DEEPSLIDE_FOLDER_DEPTH")]
    pub folder_depth: usize,

    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "DEEPSLIDE_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // ========================================================================
    // Logging Configuration
    // ========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.root.is_dir() {
            return Err(format!(
                "root directory does not exist: {}",
                self.root.display()
            ));
        }

        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        if self.overlap >= self.tile_size {
            return Err("overlap must be smaller than tile_size".to_string());
        }

        TileFormat::parse(&self.tile_format)
            .map_err(|_| format!("tile_format must be jpeg or png, got '{}'", self.tile_format))?;

        if self.tile_quality == 0 || self.tile_quality > 100 {
            return Err("tile_quality must be between 1 and 100".to_string());
        }

        if self.cache_slides == 0 {
            return Err("cache_slides must be greater than 0".to_string());
        }
        if self.folder_depth == 0 {
            return Err("folder_depth must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Tiling options derived from this configuration.
    pub fn tiling_options(&self) -> TilingOptions {
        TilingOptions {
            tile_size: self.tile_size,
            overlap: self.overlap,
            limit_bounds: self.limit_bounds,
        }
    }

    /// Parsed tile format (call validate() first).
    pub fn parsed_tile_format(&self) -> TileFormat {
        TileFormat::parse(&self.tile_format).unwrap_or(TileFormat::Jpeg)
    }
}

// ============================================================================
// Tests
// ============================================================================
