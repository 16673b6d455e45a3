//! In-memory LRU cache of decoded images.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::ImageKey;
use crate::domain::ports::ImageCachePort;

/// Default maximum number of images kept in memory.
pub const DEFAULT_CACHE_SIZE: usize = 50;

/// LRU cache keyed by the full request key, so differently transformed
/// variants of one resource are cached separately.
pub struct MemoryImageCache {
    cache: Mutex<LruCache<ImageKey, Arc<image::DynamicImage>>>,
}

impl std::fmt::Debug for MemoryImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("MemoryImageCache")
            .field("len", &cache.len())
            .field("capacity", &cache.cap())
            .finish()
    }
}

impl MemoryImageCache {
    /// Creates a cache holding at most `capacity` images (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    #[must_use]
    pub fn peek(&self, key: &ImageKey) -> Option<Arc<image::DynamicImage>> {
        self.cache.lock().peek(key).cloned()
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

#[async_trait::async_trait]
impl ImageCachePort for MemoryImageCache {
    async fn get(&self, key: &ImageKey) -> Option<Arc<image::DynamicImage>> {
        let hit = self.cache.lock().get(key).cloned();
        trace!(key = %key, hit = hit.is_some(), "memory cache lookup");
        hit
    }

    async fn put(&self, key: ImageKey, image: Arc<image::DynamicImage>) {
        debug!(key = %key, "storing image in memory cache");
        self.cache.lock().put(key, image);
    }

    async fn evict(&self, key: &ImageKey) {
        if self.cache.lock().pop(key).is_some() {
            debug!(key = %key, "evicted image from memory cache");
        }
    }

    fn len(&self) -> usize {
        self.cache.lock().len()
    }

    fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }

    async fn clear(&self) {
        self.cache.lock().clear();
        debug!("cleared memory image cache");
    }
}
