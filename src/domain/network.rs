//! Connectivity state reported by the platform.

use bitflags::bitflags;

bitflags! {
    /// Transports available on the active network.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
    pub struct Transport: u8 {
        /// Wi-Fi.
        const WIFI = 1 << 0;
        /// Wired ethernet.
        const ETHERNET = 1 << 1;
        /// Wi-Fi Aware (peer to peer).
        const WIFI_AWARE = 1 << 2;
        /// Cellular data.
        const CELLULAR = 1 << 3;
    }
}

/// Capabilities of the active network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NetworkCapabilities {
    /// The network can reach the internet.
    pub internet: bool,
    /// Transports backing the network.
    pub transports: Transport,
}

impl NetworkCapabilities {
    /// Creates capabilities for an internet-connected network.
    #[must_use]
    pub const fn connected(transports: Transport) -> Self {
        Self {
            internet: true,
            transports,
        }
    }

    /// Creates capabilities for a network without internet access.
    #[must_use]
    pub const fn disconnected() -> Self {
        Self {
            internet: false,
            transports: Transport::empty(),
        }
    }

    /// Returns true if the network can reach the internet.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.internet
    }

    /// Returns true for unmetered broadband-class transports.
    #[must_use]
    pub const fn is_broadband(&self) -> bool {
        self.transports
            .intersects(Transport::WIFI.union(Transport::ETHERNET).union(Transport::WIFI_AWARE))
    }

    /// Returns true for metered cellular transports.
    #[must_use]
    pub const fn is_cellular(&self) -> bool {
        self.transports.contains(Transport::CELLULAR)
    }
}
