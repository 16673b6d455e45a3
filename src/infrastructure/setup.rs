//! Wires the default collaborators into a [`Pipeline`].

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use super::config::PipelineConfig;
use super::image::{
    DiskImageCache, FileRequestHandler, GeometryTransformer, ImageDecoder, MemoryImageCache,
    NetworkRequestHandler,
};
use crate::application::{BuildError, Pipeline};
use crate::domain::errors::HuntError;

/// Errors raised while assembling the default pipeline.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The HTTP client could not be created.
    #[error(transparent)]
    Http(#[from] HuntError),
    /// The pipeline could not be started.
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Builds a pipeline with the memory cache, the disk-backed network handler,
/// the file handler, the `image` decoder and the geometry transformer.
///
/// A disk cache that cannot be opened is logged and skipped.
///
/// # Errors
/// Returns [`SetupError`] if the HTTP client or the pipeline cannot be created.
pub async fn build_pipeline(config: &PipelineConfig) -> Result<Pipeline, SetupError> {
    let disk_cache = match &config.disk_cache_dir {
        Some(dir) => DiskImageCache::new(dir.clone(), config.disk_cache_size).await,
        None => DiskImageCache::default_location(config.disk_cache_size).await,
    };
    let disk_cache = match disk_cache {
        Ok(cache) => {
            info!(dir = %cache.dir().display(), entries = cache.len(), "disk cache ready");
            Some(Arc::new(cache))
        }
        Err(e) => {
            warn!(error = %e, "disk cache unavailable, continuing without it");
            None
        }
    };

    let network = NetworkRequestHandler::new(disk_cache, config.timeout())?;
    let pipeline = Pipeline::builder(config.dispatcher_config())
        .thread_count(config.thread_count)
        .memory_cache(Arc::new(MemoryImageCache::new(config.memory_cache_size)))
        .decoder(Arc::new(ImageDecoder::new()))
        .transformer(Arc::new(GeometryTransformer::new()))
        .handler(Arc::new(network))
        .handler(Arc::new(FileRequestHandler::new()))
        .build()?;
    Ok(pipeline)
}
