//! Scheduling priority for requests and hunters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

/// Priority of a request. Higher priorities are executed first.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background work.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Work the caller is actively waiting on.
    High,
}

impl Priority {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Normal => 1,
            Self::High => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Normal,
            _ => Self::High,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A priority cell shared between a hunter and its queued work item.
///
/// The executor reads the current value whenever it picks the next item,
/// so a hunter whose requesters change is re-ordered without re-queueing.
#[derive(Debug, Clone)]
pub struct SharedPriority(Arc<AtomicU8>);

impl SharedPriority {
    /// Creates a cell holding `priority`.
    #[must_use]
    pub fn new(priority: Priority) -> Self {
        Self(Arc::new(AtomicU8::new(priority.to_u8())))
    }

    /// Returns the current priority.
    #[must_use]
    pub fn get(&self) -> Priority {
        Priority::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Replaces the current priority.
    pub fn set(&self, priority: Priority) {
        self.0.store(priority.to_u8(), Ordering::Release);
    }
}

impl Default for SharedPriority {
    fn default() -> Self {
        Self::new(Priority::default())
    }
}
