//! HTTP surface: routing, request parsing, and handlers.

// ============================================================================
// Modules
// ============================================================================

pub mod dzi;
pub mod handlers;
pub mod request;
pub mod routes;

// ============================================================================
// Re-exports
// ============================================================================

pub use handlers::AppState;
pub use request::{parse_deepzoom_path, DeepZoomRequest};
pub use routes::{create_router, RouterConfig};
