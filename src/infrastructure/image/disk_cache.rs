//! Disk cache of raw response bodies, keyed by resource URI.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace, warn};

use crate::domain::entities::ImageKey;
use crate::domain::ports::{CacheError, CacheResult};

/// Default disk cache budget in bytes (50 MiB).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 50 * 1024 * 1024;

const ENTRY_EXTENSION: &str = "img";

/// Size-bounded directory of cached bodies. The least recently accessed
/// entries are removed first once the budget is exceeded.
#[derive(Debug)]
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl DiskImageCache {
    /// Opens (creating if needed) a cache in `cache_dir`.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created or read.
    pub async fn new(cache_dir: PathBuf, max_size: u64) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("failed to create cache dir: {e}")))?;

        let mut entries = fs::read_dir(&cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("failed to read cache dir: {e}")))?;
        let mut total_size = 0u64;
        let mut count = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if is_entry(&entry.path())
                && let Ok(meta) = entry.metadata().await
            {
                total_size += meta.len();
                count += 1;
            }
        }

        let cache = Self {
            cache_dir,
            max_size,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
        };
        cache.cleanup_if_needed().await;
        Ok(cache)
    }

    /// Opens a cache in the platform cache directory.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created.
    pub async fn default_location(max_size: u64) -> CacheResult<Self> {
        Self::new(default_cache_dir(), max_size).await
    }

    /// Returns the cache directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, key: &ImageKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{ENTRY_EXTENSION}", key.digest()))
    }

    /// Reads a cached body.
    pub async fn get_bytes(&self, key: &ImageKey) -> Option<Bytes> {
        match fs::read(self.cache_path(key)).await {
            Ok(bytes) => {
                trace!(key = %key, "disk cache hit");
                Some(Bytes::from(bytes))
            }
            Err(_) => {
                trace!(key = %key, "disk cache miss");
                None
            }
        }
    }

    /// Stores a body, replacing any previous entry.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub async fn put_bytes(&self, key: &ImageKey, bytes: &[u8]) -> CacheResult<()> {
        let path = self.cache_path(key);
        let old_size = fs::metadata(&path).await.map(|m| m.len()).ok();

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| CacheError::IoError(format!("failed to create cache file: {e}")))?;
        file.write_all(bytes)
            .await
            .map_err(|e| CacheError::IoError(format!("failed to write cache file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| CacheError::IoError(format!("failed to flush cache file: {e}")))?;

        let new_size = bytes.len() as u64;
        match old_size {
            Some(old) if new_size >= old => {
                self.current_size.fetch_add(new_size - old, Ordering::Relaxed);
            }
            Some(old) => {
                self.current_size.fetch_sub(old - new_size, Ordering::Relaxed);
            }
            None => {
                self.current_size.fetch_add(new_size, Ordering::Relaxed);
                self.item_count.fetch_add(1, Ordering::Relaxed);
            }
        }
        debug!(key = %key, size = bytes.len(), "stored body in disk cache");

        self.cleanup_if_needed().await;
        Ok(())
    }

    /// Removes a cached body.
    pub async fn evict(&self, key: &ImageKey) {
        let path = self.cache_path(key);
        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        match fs::remove_file(&path).await {
            Ok(()) => {
                if let Some(size) = size {
                    self.current_size.fetch_sub(size, Ordering::Relaxed);
                    self.item_count.fetch_sub(1, Ordering::Relaxed);
                }
                debug!(key = %key, "evicted from disk cache");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, error = %e, "failed to evict from disk cache"),
        }
    }

    /// Returns true if a body is cached for `key`.
    pub async fn contains(&self, key: &ImageKey) -> bool {
        fs::try_exists(self.cache_path(key)).await.unwrap_or(false)
    }

    /// Returns the cached size in bytes.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Returns the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn cleanup_if_needed(&self) {
        let current_size = self.current_size();
        if current_size <= self.max_size {
            return;
        }
        debug!(current_size, max_size = self.max_size, "disk cache over budget");

        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return;
        };
        let mut files: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !is_entry(&path) {
                continue;
            }
            if let Ok(meta) = entry.metadata().await {
                let accessed = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                files.push((path, accessed, meta.len()));
            }
        }
        files.sort_by_key(|(_, time, _)| *time);

        // Free an extra tenth of the budget so every write does not trigger a sweep.
        let target = current_size - self.max_size + (self.max_size / 10);
        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        for (path, _, size) in files {
            if freed_size >= target {
                break;
            }
            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "failed to remove cache file");
            } else {
                freed_size += size;
                freed_count += 1;
            }
        }
        self.current_size.fetch_sub(freed_size, Ordering::Relaxed);
        self.item_count.fetch_sub(freed_count, Ordering::Relaxed);
        debug!(freed_size, freed_count, "disk cache cleanup complete");
    }
}

fn is_entry(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
}

/// Returns the platform cache directory for response bodies.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "linuxmobile", "hunter").map_or_else(
        || std::env::temp_dir().join("hunter").join("cache"),
        |dirs| dirs.cache_dir().join("bodies"),
    )
}
