//! Multi-page TIFF pyramid source.
//!
//! Opens tiled/pyramidal TIFF files (Aperio-style exports and the sidecars
//! written by the conversion pipeline). Pages are classified once at open
//! time: consecutive pages that keep the base aspect ratio while shrinking
//! form the resolution pyramid; any other page is an associated image
//! (label, macro, thumbnail). Pixel decoding is delegated to the `tiff`
//! crate and performed lazily, one page at a time, memoized in a
//! byte-bounded per-handle cache.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use image::{DynamicImage, GrayImage, Rgb, RgbImage, RgbaImage};
use lru::LruCache;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;

use crate::error::{OpenError, TileError};

use super::image::{crop_clamped, PyramidImage};

/// Aspect-ratio tolerance for classifying a page as a pyramid level.
const LEVEL_ASPECT_TOLERANCE: f64 = 0.05;

/// Upper bound on decoded pixel bytes memoized per open handle.
const DECODED_MEMO_BYTES: usize = 256 << 20;

/// Check the four magic bytes of a classic or BigTIFF header.
pub fn is_tiff_magic(header: &[u8]) -> bool {
    if header.len() < 4 {
        return false;
    }
    matches!(
        &header[..4],
        [0x49, 0x49, 0x2A, 0x00]          // little-endian TIFF
            | [0x4D, 0x4D, 0x00, 0x2A]    // big-endian TIFF
            | [0x49, 0x49, 0x2B, 0x00]    // little-endian BigTIFF
            | [0x4D, 0x4D, 0x00, 0x2B]    // big-endian BigTIFF
    )
}

/// One scanned page of the file.
#[derive(Debug, Clone)]
struct PageInfo {
    width: u32,
    height: u32,
    description: Option<String>,
}

/// A pyramidal TIFF on local storage.
pub struct TiffPyramid {
    path: PathBuf,
    /// Page index per pyramid level, level 0 first.
    levels: Vec<usize>,
    level_dims: Vec<(u32, u32)>,
    /// Associated image name -> page index.
    associated: Vec<(String, usize)>,
    properties: BTreeMap<String, String>,
    decoder: Mutex<Decoder<BufReader<File>>>,
    /// Memoized decoded pages, keyed by page index.
    decoded: Mutex<PageMemo>,
}

impl std::fmt::Debug for TiffPyramid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiffPyramid")
            .field("path", &self.path)
            .field("levels", &self.levels)
            .field("level_dims", &self.level_dims)
            .finish_non_exhaustive()
    }
}

/// Decoded-page memo bounded by total resident pixel bytes.
///
/// Large base levels would otherwise pin `width * height * 4` bytes for the
/// lifetime of the handle; eviction is LRU by page, and the most recently
/// inserted page always stays so an oversized page is still served.
struct PageMemo {
    pages: LruCache<usize, Arc<RgbaImage>>,
    resident_bytes: usize,
    max_bytes: usize,
}

impl PageMemo {
    fn new(max_bytes: usize) -> Self {
        Self {
            pages: LruCache::unbounded(),
            resident_bytes: 0,
            max_bytes,
        }
    }

    fn get(&mut self, page: usize) -> Option<Arc<RgbaImage>> {
        self.pages.get(&page).cloned()
    }

    fn insert(&mut self, page: usize, pixels: Arc<RgbaImage>) {
        let bytes = pixels.as_raw().len();
        // Pages are immutable per index, so a racing re-insert replaces an
        // equal-sized value and the byte accounting stays balanced.
        if self.pages.put(page, pixels).is_none() {
            self.resident_bytes += bytes;
        }
        while self.resident_bytes > self.max_bytes && self.pages.len() > 1 {
            if let Some((_, evicted)) = self.pages.pop_lru() {
                self.resident_bytes -= evicted.as_raw().len();
            }
        }
    }
}

impl TiffPyramid {
    /// Open a TIFF pyramid.
    ///
    /// Fails with [`OpenError::Unsupported`] when the file does not carry a
    /// TIFF magic header (the caller may then attempt conversion), with
    /// [`OpenError::Unreadable`] when the file claims to be TIFF but its
    /// structure cannot be parsed, and with [`OpenError::NotFound`] /
    /// [`OpenError::Io`] for filesystem failures.
    pub fn open(path: &Path) -> Result<Self, OpenError> {
        let mut file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OpenError::NotFound {
                path: path.to_path_buf(),
            },
            _ => OpenError::Io {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;

        let mut magic = [0u8; 4];
        let n = file.read(&mut magic).map_err(|e| OpenError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if n < 4 || !is_tiff_magic(&magic) {
            return Err(OpenError::Unsupported {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path).map_err(|e| OpenError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut decoder =
            Decoder::new(BufReader::new(file)).map_err(|e| OpenError::Unreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let pages = scan_pages(&mut decoder).map_err(|e| OpenError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if pages.is_empty() {
            return Err(OpenError::Unreadable {
                path: path.to_path_buf(),
                message: "no pages".to_string(),
            });
        }

        let (levels, associated) = classify_pages(&pages);
        let level_dims = levels
            .iter()
            .map(|&i| (pages[i].width, pages[i].height))
            .collect();
        let properties = read_properties(&mut decoder, &pages);

        Ok(Self {
            path: path.to_path_buf(),
            levels,
            level_dims,
            associated,
            properties,
            decoder: Mutex::new(decoder),
            decoded: Mutex::new(PageMemo::new(DECODED_MEMO_BYTES)),
        })
    }

    /// Path this pyramid was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decode a page, going through the memo table.
    fn page_pixels(&self, page: usize) -> Result<Arc<RgbaImage>, TileError> {
        if let Some(img) = self.decoded.lock().expect("decoded lock").get(page) {
            return Ok(img);
        }

        let pixels = {
            let mut decoder = self.decoder.lock().expect("decoder lock");
            decode_page(&mut decoder, page).map_err(|message| TileError::Region { message })?
        };
        let pixels = Arc::new(pixels);
        self.decoded
            .lock()
            .expect("decoded lock")
            .insert(page, pixels.clone());
        Ok(pixels)
    }
}

impl PyramidImage for TiffPyramid {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.level_dims.get(level).copied()
    }

    fn read_region(
        &self,
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, TileError> {
        let page = *self
            .levels
            .get(level)
            .ok_or(TileError::InvalidLevel {
                level,
                level_count: self.levels.len(),
            })?;
        let pixels = self.page_pixels(page)?;
        Ok(crop_clamped(&pixels, x, y, width, height))
    }

    fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    fn associated_names(&self) -> Vec<String> {
        self.associated.iter().map(|(n, _)| n.clone()).collect()
    }

    fn associated_image(&self, name: &str) -> Result<RgbaImage, TileError> {
        let page = self
            .associated
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, i)| i)
            .ok_or_else(|| TileError::UnknownAssociatedImage {
                name: name.to_string(),
            })?;
        self.page_pixels(page).map(|arc| (*arc).clone())
    }
}

/// Walk every IFD recording dimensions and descriptions.
fn scan_pages(
    decoder: &mut Decoder<BufReader<File>>,
) -> Result<Vec<PageInfo>, tiff::TiffError> {
    let mut pages = Vec::new();
    loop {
        let (width, height) = decoder.dimensions()?;
        let description = decoder.get_tag_ascii_string(Tag::ImageDescription).ok();
        pages.push(PageInfo {
            width,
            height,
            description,
        });
        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    Ok(pages)
}

/// Split pages into pyramid levels and associated images.
///
/// A page continues the pyramid when it is strictly smaller than the
/// previous level and keeps the base aspect ratio; anything else is an
/// associated image named from its description when recognizable.
fn classify_pages(pages: &[PageInfo]) -> (Vec<usize>, Vec<(String, usize)>) {
    let mut levels = vec![0usize];
    let mut associated = Vec::new();

    let base_aspect = pages[0].width as f64 / pages[0].height.max(1) as f64;
    let mut prev_dims = (pages[0].width, pages[0].height);

    for (index, page) in pages.iter().enumerate().skip(1) {
        let aspect = page.width as f64 / page.height.max(1) as f64;
        let aspect_ok = (aspect - base_aspect).abs() / base_aspect <= LEVEL_ASPECT_TOLERANCE;
        let shrinking = page.width < prev_dims.0 && page.height < prev_dims.1;

        if aspect_ok && shrinking {
            levels.push(index);
            prev_dims = (page.width, page.height);
        } else {
            let name = associated_name(page, index, &associated);
            associated.push((name, index));
        }
    }

    (levels, associated)
}

/// Name an associated page from its description, falling back to the index.
fn associated_name(page: &PageInfo, index: usize, taken: &[(String, usize)]) -> String {
    let from_description = page.description.as_deref().and_then(|d| {
        let lower = d.to_ascii_lowercase();
        ["label", "macro", "thumbnail"]
            .into_iter()
            .find(|k| lower.contains(k))
            .map(str::to_string)
    });
    match from_description {
        Some(name) if !taken.iter().any(|(n, _)| *n == name) => name,
        _ => format!("page {index}"),
    }
}

/// Collect display properties from the base page's tags.
fn read_properties(
    decoder: &mut Decoder<BufReader<File>>,
    pages: &[PageInfo],
) -> BTreeMap<String, String> {
    let mut properties = BTreeMap::new();

    if let Some(description) = pages[0].description.as_deref() {
        properties.insert(
            "tiff.ImageDescription".to_string(),
            description.to_string(),
        );
        // Aperio exports pack scanner metadata into the description as
        // pipe-separated "Key = Value" fields.
        if description.contains("Aperio") {
            for part in description.split('|').skip(1) {
                if let Some((key, value)) = part.split_once('=') {
                    properties.insert(
                        format!("aperio.{}", key.trim()),
                        value.trim().to_string(),
                    );
                }
            }
        }
    }

    // Resolution tags live on the base IFD; seek back before reading them.
    if decoder.seek_to_image(0).is_ok() {
        if let Ok(Some(value)) = decoder.find_tag(Tag::XResolution) {
            if let Ok(x) = value.into_f64() {
                properties.insert("tiff.XResolution".to_string(), x.to_string());
            }
        }
        if let Ok(Some(value)) = decoder.find_tag(Tag::YResolution) {
            if let Ok(y) = value.into_f64() {
                properties.insert("tiff.YResolution".to_string(), y.to_string());
            }
        }
        if let Ok(Some(value)) = decoder.find_tag(Tag::ResolutionUnit) {
            if let Ok(unit) = value.into_u16() {
                let unit = match unit {
                    2 => "inch",
                    3 => "centimetre",
                    _ => "none",
                };
                properties.insert("tiff.ResolutionUnit".to_string(), unit.to_string());
            }
        }
    }

    properties
}

/// Decode one page into RGBA pixels.
fn decode_page(
    decoder: &mut Decoder<BufReader<File>>,
    page: usize,
) -> Result<RgbaImage, String> {
    decoder.seek_to_image(page).map_err(|e| e.to_string())?;
    let (width, height) = decoder.dimensions().map_err(|e| e.to_string())?;
    let colortype = decoder.colortype().map_err(|e| e.to_string())?;
    let result = decoder.read_image().map_err(|e| e.to_string())?;

    let dynamic = match (result, colortype) {
        (DecodingResult::U8(buf), ColorType::RGB(8)) => RgbImage::from_raw(width, height, buf)
            .map(DynamicImage::ImageRgb8)
            .ok_or("truncated RGB8 page")?,
        (DecodingResult::U8(buf), ColorType::RGBA(8)) => RgbaImage::from_raw(width, height, buf)
            .map(DynamicImage::ImageRgba8)
            .ok_or("truncated RGBA8 page")?,
        (DecodingResult::U8(buf), ColorType::Gray(8)) => GrayImage::from_raw(width, height, buf)
            .map(DynamicImage::ImageLuma8)
            .ok_or("truncated Gray8 page")?,
        (DecodingResult::U16(buf), ColorType::Gray(16)) => {
            image::ImageBuffer::<image::Luma<u16>, _>::from_raw(width, height, buf)
                .map(DynamicImage::ImageLuma16)
                .ok_or("truncated Gray16 page")?
        }
        (DecodingResult::U16(buf), ColorType::RGB(16)) => {
            image::ImageBuffer::<Rgb<u16>, _>::from_raw(width, height, buf)
                .map(DynamicImage::ImageRgb16)
                .ok_or("truncated RGB16 page")?
        }
        (_, colortype) => {
            return Err(format!("unsupported TIFF color type: {colortype:?}"));
        }
    };

    Ok(dynamic.to_rgba8())
}
