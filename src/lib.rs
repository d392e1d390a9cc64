//! # deepslide
//!
//! A Deep Zoom tile server for pyramidal slide images stored on the local
//! filesystem.
//!
//! This library provides the core functionality for serving slide images as
//! Deep Zoom tiles: path resolution against a served root, a bounded cache
//! of open slides, a lazy conversion pipeline for plain images, and the Deep
//! Zoom addressing mathematics viewers like OpenSeadragon expect.
//!
//! ## Features
//!
//! - **Pyramidal TIFF support**: Serves multi-page TIFF pyramids (Aperio SVS
//!   included) directly from disk
//! - **Lazy conversion**: Plain PNG/JPEG/BMP sources convert once into a
//!   pyramidal sidecar on first access, deduplicated across requests
//! - **Bounded caching**: At most N slides stay open; concurrent opens of
//!   the same slide are collapsed into one
//! - **Traversal protection**: Every request path is canonicalized and
//!   checked against the served root
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`paths`] - Request path resolution and containment checks
//! - [`pyramid`] - Pyramid sources and Deep Zoom addressing
//! - [`slide`] - Slide handles and the bounded handle cache
//! - [`convert`] - Lazy conversion of plain images into pyramidal sidecars
//! - [`listing`] - Directory tree building for the slide browser
//! - [`tile`] - Tile output formats and encoding
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types

pub mod config;
pub mod convert;
pub mod error;
pub mod listing;
pub mod paths;
pub mod pyramid;
pub mod server;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use config::Config;
pub use convert::{convert_image, sidecar_path, Converter, SIDECAR_DIR};
pub use error::{ConvertError, OpenError, PathError, TileError};
pub use listing::{list_tree, DirectoryNode, DEFAULT_FOLDER_DEPTH};
pub use paths::{resolve, ResolvedPath};
pub use pyramid::{
    DeepZoom, FlatImage, PyramidImage, SlideMetadata, TiffPyramid, TilingOptions,
};
pub use server::{create_router, AppState, DeepZoomRequest, RouterConfig};
pub use slide::{
    microns_per_pixel, open_slide, CacheStats, OpenOutcome, SlideCache, SlideHandle,
    DEFAULT_SLIDE_CACHE_CAPACITY,
};
pub use tile::{TileEncoder, TileFormat, DEFAULT_TILE_QUALITY};
