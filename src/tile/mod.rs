//! Tile output formats and encoding.

mod encoder;

pub use encoder::{TileEncoder, TileFormat, DEFAULT_TILE_QUALITY};
