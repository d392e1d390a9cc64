//! Slide handles and the process-wide handle cache.
//!
//! A [`SlideHandle`] is one opened slide: its deep-zoom generator, its
//! associated images, and its display metadata. The [`SlideCache`] bounds
//! how many handles stay open at once and deduplicates concurrent opens of
//! the same path.

// ============================================================================
// Modules
// ============================================================================

mod cache;
mod handle;

// ============================================================================
// Re-exports
// ============================================================================

pub use cache::{CacheStats, SlideCache, DEFAULT_SLIDE_CACHE_CAPACITY};
pub use handle::{microns_per_pixel, open_slide, OpenOutcome, SlideHandle};
