//! Bounded LRU cache of open slide handles.
//!
//! The cache owns every [`SlideHandle`] in the process. A `get` that hits
//! promotes the entry and clones the `Arc`; a miss opens the slide on the
//! blocking pool behind a singleflight table so concurrent misses on the
//! same path perform exactly one open. The cache lock is only ever held for
//! map lookup and mutation, never across an open, a conversion, or a tile
//! read.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::convert::Converter;
use crate::error::OpenError;
use crate::paths::ResolvedPath;
use crate::pyramid::TilingOptions;

use super::handle::{open_slide, OpenOutcome, SlideHandle};

/// Default number of open slides kept resident.
pub const DEFAULT_SLIDE_CACHE_CAPACITY: usize = 10;

/// State of an in-flight open, shared between the leader and its waiters.
struct InFlightOpen {
    notify: Notify,
    result: Mutex<Option<Result<Arc<SlideHandle>, OpenError>>>,
}

/// Counters surfaced for logging and tests.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub resident: usize,
    pub capacity: usize,
    pub hits: u64,
    pub opens: u64,
}

/// Bounded, thread-safe map from resolved path to open slide handle.
pub struct SlideCache {
    options: TilingOptions,
    converter: Arc<Converter>,
    cache: Mutex<LruCache<PathBuf, Arc<SlideHandle>>>,
    in_flight: Mutex<HashMap<PathBuf, Arc<InFlightOpen>>>,
    hits: AtomicU64,
    opens: AtomicU64,
}

impl SlideCache {
    /// Create a cache holding at most `capacity` open slides.
    pub fn new(capacity: usize, options: TilingOptions, converter: Arc<Converter>) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(DEFAULT_SLIDE_CACHE_CAPACITY).unwrap());
        Self {
            options,
            converter,
            cache: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            opens: AtomicU64::new(0),
        }
    }

    /// Get a slide handle, opening (and converting if necessary) on miss.
    ///
    /// Concurrent misses on the same path are deduplicated: one caller
    /// becomes the leader and performs the open, everyone else waits on its
    /// completion signal and shares the result. A hit promotes the entry to
    /// most-recently-used without reopening.
    pub async fn get(&self, path: &ResolvedPath) -> Result<Arc<SlideHandle>, OpenError> {
        let key = path.as_path().to_path_buf();

        // Fast path under the cache lock only.
        {
            let mut cache = self.cache.lock().await;
            if let Some(handle) = cache.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(handle.clone());
            }
        }

        loop {
            let state = {
                let mut in_flight = self.in_flight.lock().await;
                if let Some(state) = in_flight.get(&key) {
                    state.clone()
                } else {
                    let state = Arc::new(InFlightOpen {
                        notify: Notify::new(),
                        result: Mutex::new(None),
                    });
                    in_flight.insert(key.clone(), state.clone());
                    drop(in_flight);

                    let result = self.open_with_fallback(&key).await;

                    *state.result.lock().await = Some(result.clone());
                    if let Ok(ref handle) = result {
                        let mut cache = self.cache.lock().await;
                        // LruCache::put evicts the least-recently-used entry
                        // when at capacity; evicted handles close once the
                        // last in-flight reference drops.
                        cache.put(key.clone(), handle.clone());
                    }

                    self.in_flight.lock().await.remove(&key);
                    state.notify.notify_waiters();

                    return result;
                }
            };

            // Another task is opening this slide; wait for its result. The
            // waiter must register before checking the result slot, or a
            // notification landing in between would be lost.
            let notified = state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let result = state.result.lock().await;
                if let Some(ref result) = *result {
                    return result.clone();
                }
            }
            notified.await;
            let result = state.result.lock().await;
            if let Some(ref result) = *result {
                return result.clone();
            }
        }
    }

    /// Open the slide, falling back to conversion exactly once when the
    /// source is not directly servable.
    async fn open_with_fallback(&self, path: &PathBuf) -> Result<Arc<SlideHandle>, OpenError> {
        // Re-check residency after winning the in-flight slot: a concurrent
        // open may have completed (insert plus entry removal) between this
        // caller's fast path and its claim of the slot. The resident handle
        // wins; opening again would replace it.
        {
            let mut cache = self.cache.lock().await;
            if let Some(handle) = cache.get(path) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(handle.clone());
            }
        }

        self.opens.fetch_add(1, Ordering::Relaxed);

        match self.open_blocking(path.clone()).await? {
            OpenOutcome::Opened(handle) => Ok(handle),
            OpenOutcome::NotFound => Err(OpenError::NotFound { path: path.clone() }),
            OpenOutcome::Unsupported => {
                debug!(path = %path.display(), "not directly servable, converting");
                let sidecar = self.converter.ensure_converted(path).await?;
                info!(
                    path = %path.display(),
                    sidecar = %sidecar.display(),
                    "serving converted sidecar"
                );
                match self.open_blocking(sidecar).await? {
                    OpenOutcome::Opened(handle) => Ok(handle),
                    // One-shot fallback: a sidecar that still cannot be
                    // opened is terminal for this request.
                    _ => Err(OpenError::Unsupported { path: path.clone() }),
                }
            }
        }
    }

    /// Run the synchronous open on the blocking pool.
    async fn open_blocking(&self, path: PathBuf) -> Result<OpenOutcome, OpenError> {
        let options = self.options;
        let join_path = path.clone();
        tokio::task::spawn_blocking(move || open_slide(&path, options))
            .await
            .map_err(|e| OpenError::Io {
                path: join_path,
                message: format!("open task failed: {e}"),
            })?
    }

    /// Current counters and occupancy.
    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.lock().await;
        CacheStats {
            resident: cache.len(),
            capacity: cache.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
        }
    }

    /// Number of resident handles.
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a path is currently resident, without promoting it.
    pub async fn contains(&self, path: &ResolvedPath) -> bool {
        self.cache
            .lock()
            .await
            .contains(&path.as_path().to_path_buf())
    }

    /// Release every handle, for shutdown.
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
    }
}
