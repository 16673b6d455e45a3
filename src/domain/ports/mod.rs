mod image_cache_port;
mod image_ops_port;
mod request_handler_port;
mod target_port;
mod transformation_port;

pub use image_cache_port::{CacheError, CacheResult, ImageCachePort};
pub use image_ops_port::{Decoded, Decoder, ImageTransformer};
pub use request_handler_port::{
    FetchPayload, FetchResult, RequestHandler, UnrecognizedRequestHandler,
};
pub use target_port::Target;
#[cfg(test)]
pub use target_port::MockTarget;
pub use transformation_port::Transformation;
