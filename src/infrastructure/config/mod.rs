//! Pipeline configuration.

pub mod args;
pub mod pipeline_config;
pub mod storage;

pub use args::CliArgs;
pub use pipeline_config::{LogLevel, PipelineConfig};
pub use storage::{ConfigError, ConfigStorage};
