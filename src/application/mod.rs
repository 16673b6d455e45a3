//! Application layer: the dispatcher, hunters, worker pool and the
//! caller-facing pipeline.

/// Caller-facing pipeline facade.
pub mod pipeline;
/// Scheduling services.
pub mod services;

pub use pipeline::{BuildError, Pipeline, PipelineBuilder};
pub use services::{DispatchEvent, DispatcherConfig, DispatcherHandle, Stats, StatsSnapshot};
