//! Cache and network policies attached to a request.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Controls how a request interacts with the memory cache.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MemoryPolicy: u8 {
        /// Skip the memory cache lookup.
        const NO_CACHE = 1 << 0;
        /// Do not store the result in the memory cache.
        const NO_STORE = 1 << 1;
    }
}

impl MemoryPolicy {
    /// Returns true if the memory cache may be consulted.
    #[must_use]
    pub const fn should_read(self) -> bool {
        !self.contains(Self::NO_CACHE)
    }

    /// Returns true if a result may be written to the memory cache.
    #[must_use]
    pub const fn should_write(self) -> bool {
        !self.contains(Self::NO_STORE)
    }
}

bitflags! {
    /// Controls how a fetch interacts with the disk cache and the network.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct NetworkPolicy: u8 {
        /// Skip the disk cache and force a network fetch.
        const NO_CACHE = 1 << 0;
        /// Do not store the response in the disk cache.
        const NO_STORE = 1 << 1;
        /// Only serve from local caches, never the network.
        const OFFLINE = 1 << 2;
    }
}

impl NetworkPolicy {
    /// Returns true if the disk cache may be consulted.
    #[must_use]
    pub const fn should_read_from_disk_cache(self) -> bool {
        !self.contains(Self::NO_CACHE)
    }

    /// Returns true if a response may be written to the disk cache.
    #[must_use]
    pub const fn should_write_to_disk_cache(self) -> bool {
        !self.contains(Self::NO_STORE)
    }

    /// Returns true if the network must not be used.
    #[must_use]
    pub const fn is_offline_only(self) -> bool {
        self.contains(Self::OFFLINE)
    }
}
