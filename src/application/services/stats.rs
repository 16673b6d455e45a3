//! Pipeline counters and their printable snapshot.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use image::DynamicImage;

/// Live counters updated by hunters.
#[derive(Debug, Default)]
pub struct Stats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    download_count: AtomicU64,
    total_download_size: AtomicU64,
    decoded_count: AtomicU64,
    total_decoded_size: AtomicU64,
    transformed_count: AtomicU64,
    total_transformed_size: AtomicU64,
}

impl Stats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a memory cache hit.
    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a memory cache miss.
    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a finished download of `bytes` bytes.
    pub fn download_finished(&self, bytes: u64) {
        self.download_count.fetch_add(1, Ordering::Relaxed);
        self.total_download_size.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a freshly decoded image.
    pub fn image_decoded(&self, image: &DynamicImage) {
        self.decoded_count.fetch_add(1, Ordering::Relaxed);
        self.total_decoded_size
            .fetch_add(image_size(image), Ordering::Relaxed);
    }

    /// Records a transformed image.
    pub fn image_transformed(&self, image: &DynamicImage) {
        self.transformed_count.fetch_add(1, Ordering::Relaxed);
        self.total_transformed_size
            .fetch_add(image_size(image), Ordering::Relaxed);
    }

    /// Captures the counters together with the memory cache occupancy.
    #[must_use]
    pub fn snapshot(&self, cache_size: usize, cache_capacity: usize) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let download_count = load(&self.download_count);
        let total_download_size = load(&self.total_download_size);
        let decoded_count = load(&self.decoded_count);
        let total_decoded_size = load(&self.total_decoded_size);
        let transformed_count = load(&self.transformed_count);
        let total_transformed_size = load(&self.total_transformed_size);

        StatsSnapshot {
            cache_size,
            cache_capacity,
            cache_hits: load(&self.cache_hits),
            cache_misses: load(&self.cache_misses),
            download_count,
            total_download_size,
            average_download_size: average(total_download_size, download_count),
            decoded_count,
            total_decoded_size,
            average_decoded_size: average(total_decoded_size, decoded_count),
            transformed_count,
            total_transformed_size,
            average_transformed_size: average(total_transformed_size, transformed_count),
            taken_at: SystemTime::now(),
        }
    }
}

fn image_size(image: &DynamicImage) -> u64 {
    image.as_bytes().len() as u64
}

const fn average(total: u64, count: u64) -> u64 {
    if count == 0 { 0 } else { total / count }
}

/// A point-in-time copy of [`Stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub cache_size: usize,
    pub cache_capacity: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub download_count: u64,
    pub total_download_size: u64,
    pub average_download_size: u64,
    pub decoded_count: u64,
    pub total_decoded_size: u64,
    pub average_decoded_size: u64,
    pub transformed_count: u64,
    pub total_transformed_size: u64,
    pub average_transformed_size: u64,
    pub taken_at: SystemTime,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=============== BEGIN HUNTER STATS ===============")?;
        writeln!(f, "Memory Cache Stats")?;
        writeln!(f, "  Capacity: {}", self.cache_capacity)?;
        writeln!(f, "  Size: {}", self.cache_size)?;
        writeln!(f, "  Hits: {}", self.cache_hits)?;
        writeln!(f, "  Misses: {}", self.cache_misses)?;
        writeln!(f, "Network Stats")?;
        writeln!(f, "  Download Count: {}", self.download_count)?;
        writeln!(f, "  Total Download Size: {}", self.total_download_size)?;
        writeln!(f, "  Average Download Size: {}", self.average_download_size)?;
        writeln!(f, "Image Stats")?;
        writeln!(f, "  Total Images Decoded: {}", self.decoded_count)?;
        writeln!(f, "  Total Decoded Size: {}", self.total_decoded_size)?;
        writeln!(f, "  Total Images Transformed: {}", self.transformed_count)?;
        writeln!(f, "  Total Transformed Size: {}", self.total_transformed_size)?;
        writeln!(f, "  Average Decoded Size: {}", self.average_decoded_size)?;
        writeln!(f, "  Average Transformed Size: {}", self.average_transformed_size)?;
        write!(f, "=============== END HUNTER STATS ===============")
    }
}
