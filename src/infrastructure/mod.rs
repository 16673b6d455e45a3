//! Infrastructure layer: caches, handlers, configuration and platform adapters.

/// Pipeline configuration.
pub mod config;
/// Image caches, request handlers, decoding and transforms.
pub mod image;
/// Connectivity signal adapter.
pub mod network_monitor;
/// Default pipeline assembly.
pub mod setup;

pub use config::{CliArgs, ConfigError, ConfigStorage, LogLevel, PipelineConfig};
pub use image::{
    DiskImageCache, FileRequestHandler, GeometryTransformer, ImageDecoder, MemoryImageCache,
    NetworkRequestHandler,
};
pub use network_monitor::NetworkMonitor;
pub use setup::{SetupError, build_pipeline};
