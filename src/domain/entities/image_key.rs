//! Domain types identifying cached images.

use serde::{Deserialize, Serialize};

/// Deterministic identity of a resource plus its transform pipeline.
///
/// Used for request coalescing and as the memory cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageKey(String);

impl ImageKey {
    /// Creates a new `ImageKey` from any string-like input.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a filesystem-safe digest of the key.
    #[must_use]
    pub fn digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.0.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }
}

impl std::fmt::Display for ImageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keys are newline separated; keep log lines on one line.
        write!(f, "{}", self.0.trim_end().replace('\n', "|"))
    }
}

impl From<&str> for ImageKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ImageKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Where a delivered image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadedFrom {
    /// The in-memory cache.
    Memory,
    /// Local storage or the disk cache.
    Disk,
    /// A network download.
    Network,
}

impl std::fmt::Display for LoadedFrom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}
