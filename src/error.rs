use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving a caller-supplied path against the served root.
#[derive(Debug, Clone, Error)]
pub enum PathError {
    /// Canonical form of the requested path escapes the served root.
    ///
    /// Always a client error. Handlers map it to 404 so directory structure
    /// outside the root is not leaked.
    #[error("path escapes the served root: {relative}")]
    Traversal { relative: String },

    /// The requested path does not exist under the root.
    #[error("not found: {path}")]
    NotFound { path: PathBuf },
}

/// Errors raised while converting an unsupported image to a pyramidal sidecar.
///
/// Cloneable so a single conversion result can be fanned out to every
/// concurrent waiter on the same output path.
#[derive(Debug, Clone, Error)]
pub enum ConvertError {
    /// The source pixel data could not be decoded at all.
    #[error("cannot decode {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    /// Writing the pyramidal output failed.
    #[error("cannot write {path}: {message}")]
    Encode { path: PathBuf, message: String },

    /// Filesystem error around the sidecar directory or temp file.
    #[error("conversion I/O error on {path}: {message}")]
    Io { path: PathBuf, message: String },
}

/// Errors raised while opening a slide (including the one-shot conversion
/// fallback). Cloneable for the same reason as [`ConvertError`]: the slide
/// cache hands the leader's result to every waiter.
#[derive(Debug, Clone, Error)]
pub enum OpenError {
    /// The file disappeared between path resolution and open.
    #[error("slide not found: {path}")]
    NotFound { path: PathBuf },

    /// The file exists but is not a servable pyramid source and conversion
    /// was not attempted (or the converted output still failed to open).
    #[error("unsupported slide format: {path}")]
    Unsupported { path: PathBuf },

    /// The file looks like a pyramid source but its structure is broken.
    #[error("unreadable slide {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    /// Filesystem error while opening.
    #[error("I/O error opening {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The conversion fallback ran and failed.
    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),
}

/// Errors raised while addressing or producing a single tile.
#[derive(Debug, Error)]
pub enum TileError {
    /// Requested deep-zoom level is outside the pyramid.
    #[error("invalid level {level} (slide has {level_count} levels)")]
    InvalidLevel { level: usize, level_count: usize },

    /// Requested tile coordinates fall outside the level's tile grid.
    #[error("tile ({col}, {row}) out of bounds at level {level} (grid is {cols}x{rows})")]
    TileOutOfBounds {
        level: usize,
        col: u32,
        row: u32,
        cols: u32,
        rows: u32,
    },

    /// The slide has no associated image with the requested name.
    #[error("unknown associated image: {name}")]
    UnknownAssociatedImage { name: String },

    /// The requested encoding format is not jpeg or png.
    #[error("unsupported tile format: {format}")]
    UnsupportedFormat { format: String },

    /// Reading the region from the underlying pyramid source failed.
    #[error("failed to read region: {message}")]
    Region { message: String },

    /// Encoding the produced region failed.
    #[error("failed to encode tile: {message}")]
    Encode { message: String },

    /// The slide itself could not be opened.
    #[error(transparent)]
    Open(#[from] OpenError),

    /// The request path failed resolution.
    #[error(transparent)]
    Path(#[from] PathError),
}
