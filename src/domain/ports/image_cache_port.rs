//! Port definition for image caching.

use std::sync::Arc;

use crate::domain::entities::ImageKey;

/// Result type for cache operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// I/O error during cache operation.
    #[error("IO error: {0}")]
    IoError(String),
}

/// Port for the decoded-image memory cache.
///
/// The cache is shared mutable state that may be evicted concurrently,
/// so a miss is always a valid answer. Implementations must be thread-safe.
#[async_trait::async_trait]
pub trait ImageCachePort: Send + Sync {
    /// Attempts to get an image from the cache.
    /// Returns None if not cached.
    async fn get(&self, key: &ImageKey) -> Option<Arc<image::DynamicImage>>;

    /// Stores an image in the cache.
    async fn put(&self, key: ImageKey, image: Arc<image::DynamicImage>);

    /// Removes an image from the cache.
    async fn evict(&self, key: &ImageKey);

    /// Returns the current number of cached images.
    fn len(&self) -> usize;

    /// Returns the maximum number of cached images.
    fn capacity(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears all images from the cache.
    async fn clear(&self);
}
