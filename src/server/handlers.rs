//! HTTP request handlers.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::convert::Converter;
use crate::error::{ConvertError, OpenError, PathError, TileError};
use crate::listing::{list_tree, DirectoryNode, DEFAULT_FOLDER_DEPTH};
use crate::paths::{resolve, ResolvedPath};
use crate::pyramid::{SlideMetadata, TilingOptions};
use crate::slide::{SlideCache, SlideHandle};
use crate::tile::{TileEncoder, TileFormat};

use super::dzi::generate_dzi_xml;
use super::request::{parse_deepzoom_path, DeepZoomRequest};

// ============================================================================
// Application State
// ============================================================================

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Root directory being served.
    pub root: PathBuf,
    /// Process-wide slide handle cache.
    pub cache: Arc<SlideCache>,
    /// Encoder for tile payloads.
    pub encoder: TileEncoder,
    /// Format advertised in descriptors.
    pub tile_format: TileFormat,
    /// Cache-Control max-age for tiles and descriptors, in seconds.
    pub cache_max_age: u32,
    /// Maximum directory listing depth.
    pub folder_depth: usize,
}

impl AppState {
    pub fn new(
        root: PathBuf,
        cache_capacity: usize,
        options: TilingOptions,
        tile_format: TileFormat,
        tile_quality: u8,
    ) -> Self {
        let converter = Arc::new(Converter::new());
        Self {
            root,
            cache: Arc::new(SlideCache::new(cache_capacity, options, converter)),
            encoder: TileEncoder::new(tile_quality),
            tile_format,
            cache_max_age: 0,
            folder_depth: DEFAULT_FOLDER_DEPTH,
        }
    }

    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    pub fn with_folder_depth(mut self, depth: usize) -> Self {
        self.folder_depth = depth;
        self
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// JSON error payload.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Slide metadata payload for viewers.
#[derive(Debug, Serialize)]
pub struct SlideInfo {
    pub name: String,
    /// Microns per pixel at full resolution; 0.0 when unknown.
    pub mpp: f64,
    pub metadata: SlideMetadata,
    pub associated: Vec<String>,
    pub properties: BTreeMap<String, String>,
}

impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let status = match &self {
            // Everything path-shaped is a plain 404; requests outside the
            // root must not learn what exists there.
            TileError::Path(PathError::Traversal { relative }) => {
                debug!(relative, "rejected path traversal attempt");
                StatusCode::NOT_FOUND
            }
            TileError::Path(PathError::NotFound { .. }) => StatusCode::NOT_FOUND,
            TileError::Open(OpenError::NotFound { .. }) => StatusCode::NOT_FOUND,
            TileError::InvalidLevel { .. }
            | TileError::TileOutOfBounds { .. }
            | TileError::UnknownAssociatedImage { .. }
            | TileError::UnsupportedFormat { .. } => StatusCode::NOT_FOUND,
            TileError::Open(OpenError::Unsupported { .. })
            | TileError::Open(OpenError::Unreadable { .. })
            | TileError::Open(OpenError::Convert(ConvertError::Unreadable { .. })) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            _ => {
                error!(error = %self, "internal error while serving request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// `GET /health`
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Query parameters for the tree listing.
#[derive(Debug, Deserialize)]
pub struct TreeQuery {
    /// Subtree to list, relative to the root. Defaults to the root itself.
    #[serde(default)]
    pub path: String,
    /// Listing depth override.
    pub depth: Option<usize>,
    /// Case-insensitive substring filter on image names.
    #[serde(default)]
    pub filter: String,
}

/// `GET /tree?path=...&depth=...&filter=...`
pub async fn tree_handler(
    State(state): State<AppState>,
    Query(query): Query<TreeQuery>,
) -> Result<Json<Vec<DirectoryNode>>, TileError> {
    // Validate the subtree path before touching the filesystem.
    let relative = query.path.trim_matches('/').to_string();
    if !relative.is_empty() {
        resolve(&state.root, &relative).map_err(TileError::from)?;
    }

    let root = state.root.clone();
    let depth = query.depth.unwrap_or(state.folder_depth);
    let filter = query.filter.clone();
    let nodes =
        tokio::task::spawn_blocking(move || list_tree(&root, &relative, depth, &filter))
            .await
            .map_err(|e| TileError::Region {
                message: format!("listing task failed: {e}"),
            })?;

    Ok(Json(nodes))
}

/// `GET /metadata/{*path}`
pub async fn metadata_handler(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
) -> Result<Json<SlideInfo>, TileError> {
    let handle = open_cached(&state, &path).await?;
    Ok(Json(SlideInfo {
        name: handle.file_name().to_string(),
        mpp: handle.mpp(),
        metadata: handle.metadata(state.tile_format.extension()),
        associated: handle.associated_names(),
        properties: handle.properties().clone(),
    }))
}

/// `GET /slides/{*path}` — descriptors and tiles, Deep Zoom URL grammar.
pub async fn deepzoom_handler(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
) -> Result<Response, TileError> {
    let request = parse_deepzoom_path(&path).ok_or_else(|| {
        PathError::NotFound {
            path: PathBuf::from(&path),
        }
    })?;

    match request {
        DeepZoomRequest::Descriptor { slide } => {
            let handle = open_cached(&state, &slide).await?;
            let metadata = handle.metadata(state.tile_format.extension());
            Ok(descriptor_response(&state, &metadata))
        }
        DeepZoomRequest::AssociatedDescriptor { slide, name } => {
            let handle = open_cached(&state, &slide).await?;
            let metadata = handle.associated_metadata(&name, state.tile_format.extension())?;
            Ok(descriptor_response(&state, &metadata))
        }
        DeepZoomRequest::Tile {
            slide,
            level,
            col,
            row,
            format,
        } => {
            let handle = open_cached(&state, &slide).await?;
            let pixels = run_tile_task(move |h| h.tile(level, col, row), handle).await?;
            tile_response(&state, &pixels, format)
        }
        DeepZoomRequest::AssociatedTile {
            slide,
            name,
            level,
            col,
            row,
            format,
        } => {
            let handle = open_cached(&state, &slide).await?;
            let pixels =
                run_tile_task(move |h| h.associated_tile(&name, level, col, row), handle).await?;
            tile_response(&state, &pixels, format)
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolve a request path and fetch the slide through the cache.
async fn open_cached(state: &AppState, relative: &str) -> Result<Arc<SlideHandle>, TileError> {
    let resolved: ResolvedPath = resolve(&state.root, relative)?;
    let handle = state.cache.get(&resolved).await?;
    Ok(handle)
}

/// Run tile extraction on the blocking pool.
async fn run_tile_task<F>(task: F, handle: Arc<SlideHandle>) -> Result<image::RgbaImage, TileError>
where
    F: FnOnce(&SlideHandle) -> Result<image::RgbaImage, TileError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || task(&handle))
        .await
        .map_err(|e| TileError::Region {
            message: format!("tile task failed: {e}"),
        })?
}

fn descriptor_response(state: &AppState, metadata: &SlideMetadata) -> Response {
    let (width, height) = metadata
        .level_dimensions
        .last()
        .copied()
        .unwrap_or((0, 0));
    let xml = generate_dzi_xml(
        width,
        height,
        metadata.tile_size,
        metadata.tile_overlap,
        &metadata.tile_format,
    );
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/xml".to_string()),
            (header::CACHE_CONTROL, cache_control(state.cache_max_age)),
        ],
        xml,
    )
        .into_response()
}

fn tile_response(
    state: &AppState,
    pixels: &image::RgbaImage,
    format: TileFormat,
) -> Result<Response, TileError> {
    let bytes = state.encoder.encode(pixels, format)?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.mime().to_string()),
            (header::CACHE_CONTROL, cache_control(state.cache_max_age)),
        ],
        bytes,
    )
        .into_response())
}

fn cache_control(max_age: u32) -> String {
    if max_age == 0 {
        "no-cache".to_string()
    } else {
        format!("public, max-age={max_age}")
    }
}
