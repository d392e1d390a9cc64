//! Parsing of deep-zoom request paths.
//!
//! Everything under the slide route is a single wildcard; the slide's own
//! relative path and the deep-zoom suffix are disambiguated here:
//!
//! ```text
//! {slide}.dzi                                  descriptor
//! {slide}.dzi/{name}                           associated-image descriptor
//! {slide}_files/{level}/{col}_{row}.{format}   tile
//! {slide}.dzi/{name}_files/{level}/{col}_{row}.{format}
//!                                              associated-image tile
//! ```
//!
//! `{slide}` may itself contain slashes; the suffix markers are what end it.

use crate::tile::TileFormat;

/// A parsed deep-zoom request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepZoomRequest {
    /// XML descriptor for the slide's main pyramid.
    Descriptor { slide: String },
    /// XML descriptor for one associated image.
    AssociatedDescriptor { slide: String, name: String },
    /// One tile of the main pyramid.
    Tile {
        slide: String,
        level: usize,
        col: u32,
        row: u32,
        format: TileFormat,
    },
    /// One tile of an associated image.
    AssociatedTile {
        slide: String,
        name: String,
        level: usize,
        col: u32,
        row: u32,
        format: TileFormat,
    },
}

/// Parse a slide-route wildcard path, or `None` when it matches no form.
pub fn parse_deepzoom_path(path: &str) -> Option<DeepZoomRequest> {
    let path = path.trim_matches('/');

    // Associated forms first: "{slide}.dzi/..." is unambiguous because the
    // plain descriptor has nothing after ".dzi".
    if let Some(split) = path.find(".dzi/") {
        let slide = path[..split].to_string();
        let rest = &path[split + ".dzi/".len()..];
        if slide.is_empty() || rest.is_empty() {
            return None;
        }

        return if let Some(name_split) = rest.rfind("_files/") {
            let name = rest[..name_split].to_string();
            let (level, col, row, format) = parse_tile_suffix(&rest[name_split + "_files/".len()..])?;
            (!name.is_empty()).then_some(DeepZoomRequest::AssociatedTile {
                slide,
                name,
                level,
                col,
                row,
                format,
            })
        } else {
            Some(DeepZoomRequest::AssociatedDescriptor {
                slide,
                name: rest.to_string(),
            })
        };
    }

    if let Some(slide) = path.strip_suffix(".dzi") {
        return (!slide.is_empty()).then(|| DeepZoomRequest::Descriptor {
            slide: slide.to_string(),
        });
    }

    // Tile form. A directory or file name may itself contain "_files", so
    // split on the last occurrence.
    if let Some(split) = path.rfind("_files/") {
        let slide = path[..split].to_string();
        let (level, col, row, format) = parse_tile_suffix(&path[split + "_files/".len()..])?;
        return (!slide.is_empty()).then_some(DeepZoomRequest::Tile {
            slide,
            level,
            col,
            row,
            format,
        });
    }

    None
}

/// Parse "{level}/{col}_{row}.{format}".
fn parse_tile_suffix(suffix: &str) -> Option<(usize, u32, u32, TileFormat)> {
    let (level, filename) = suffix.split_once('/')?;
    let level: usize = level.parse().ok()?;

    let (coords, format) = filename.rsplit_once('.')?;
    let format = TileFormat::parse(format).ok()?;

    let (col, row) = coords.split_once('_')?;
    let col: u32 = col.parse().ok()?;
    let row: u32 = row.parse().ok()?;

    Some((level, col, row, format))
}
