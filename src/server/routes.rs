//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                 - Health check
//! /tree                   - Directory tree of servable images
//! /metadata/{*path}       - Slide metadata as JSON
//! /slides/{*path}         - Deep Zoom descriptors and tiles
//! ```
//!
//! The `/slides` wildcard carries the whole Deep Zoom grammar; see the
//! request module for how descriptors, tiles, and associated images are
//! told apart.

use std::time::Duration;

use axum::{routing::get, Router};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    deepzoom_handler, health_handler, metadata_handler, tree_handler, AppState,
};

// ============================================================================
// Router Configuration
// ============================================================================

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cors_origins: None,
            enable_tracing: true,
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    /// Pass None (or don't call this method) to allow any origin.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// ============================================================================
// Router Builder
// ============================================================================

/// Create the main application router.
pub fn create_router(state: AppState, config: RouterConfig) -> Router {
    let cors = build_cors_layer(&config);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/tree", get(tree_handler))
        .route("/metadata/{*path}", get(metadata_handler))
        .route("/slides/{*path}", get(deepzoom_handler))
        .with_state(state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
