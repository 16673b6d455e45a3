//! Image infrastructure: caches, request handlers, decode and transform.

pub mod decoder;
pub mod disk_cache;
pub mod file_handler;
pub mod memory_cache;
pub mod network_handler;
pub mod transform;

pub use decoder::ImageDecoder;
pub use disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskImageCache};
pub use file_handler::FileRequestHandler;
pub use memory_cache::{DEFAULT_CACHE_SIZE, MemoryImageCache};
pub use network_handler::{NETWORK_RETRY_COUNT, NetworkRequestHandler};
pub use transform::GeometryTransformer;
