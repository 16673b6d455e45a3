//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::application::DispatcherConfig;

pub(crate) const APP_NAME: &str = "hunter";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Pipeline configuration, read from `config.toml` and overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    pub log_level: LogLevel,

    /// Baseline worker count.
    pub thread_count: usize,

    /// Batch window in milliseconds.
    pub batch_delay_ms: u64,

    /// Retry backoff in milliseconds.
    pub retry_delay_ms: u64,

    /// Memory cache capacity in images.
    pub memory_cache_size: usize,

    /// Disk cache budget in bytes.
    pub disk_cache_size: u64,

    /// Disk cache directory. Defaults to the platform cache directory.
    pub disk_cache_dir: Option<PathBuf>,

    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,

    /// Observe connectivity changes, enabling replay of failed requests.
    pub scans_network_changes: bool,

    /// Log every pipeline event.
    pub logging_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            thread_count: 3,
            batch_delay_ms: 200,
            retry_delay_ms: 500,
            memory_cache_size: 50,
            disk_cache_size: 50 * 1024 * 1024,
            disk_cache_dir: None,
            timeout_secs: 30,
            scans_network_changes: true,
            logging_enabled: false,
        }
    }
}

impl PipelineConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(threads) = args.threads {
            self.thread_count = threads;
        }
        if args.logging {
            self.logging_enabled = true;
        }
    }

    /// Returns the dispatcher settings.
    #[must_use]
    pub const fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            scans_network_changes: self.scans_network_changes,
            logging_enabled: self.logging_enabled,
        }
    }

    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("hunter.log"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}
