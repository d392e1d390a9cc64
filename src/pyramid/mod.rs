//! Pyramid image sources and deep-zoom addressing.
//!
//! [`PyramidImage`] is the seam between the serving core and whatever can
//! decode pixels: the core never implements a codec, it orchestrates
//! lifecycle and addressing around this trait. Two implementations ship with
//! the crate:
//!
//! - [`TiffPyramid`] - multi-page tiled/pyramidal TIFF on disk, including
//!   the sidecar files produced by the conversion pipeline
//! - [`FlatImage`] - a single decoded image served as a one-level pyramid,
//!   used for associated images (labels, macros, thumbnails)
//!
//! [`DeepZoom`] wraps any source with the Deep Zoom addressing scheme.

mod deepzoom;
mod image;
mod tiff;

pub use deepzoom::{DeepZoom, SlideMetadata, TilingOptions};
pub use image::{FlatImage, PyramidImage};
pub use tiff::{is_tiff_magic, TiffPyramid};
