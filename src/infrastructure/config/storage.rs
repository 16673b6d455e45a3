//! Loading and saving of `config.toml`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;
use tracing::{info, warn};

use super::pipeline_config::{APP_NAME, APP_ORGANIZATION, APP_QUALIFIER, PipelineConfig};

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

/// Reads and writes `config.toml`.
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    config_dir: PathBuf,
}

impl ConfigStorage {
    /// Create a new `ConfigStorage` rooted in the platform config directory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration directory cannot be determined.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
            .ok_or(ConfigError::ConfigDirNotFound)?;

        Ok(Self { config_dir })
    }

    /// Creates a new `ConfigStorage` with a specific directory (useful for testing).
    #[must_use]
    pub fn with_dir(path: PathBuf) -> Self {
        Self { config_dir: path }
    }

    /// Returns the configuration directory path.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Ensures the configuration directory exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the directory cannot be created.
    pub fn ensure_config_dir(&self) -> Result<(), ConfigError> {
        if !self.config_dir.exists() {
            info!("Creating configuration directory at {:?}", self.config_dir);
            fs::create_dir_all(&self.config_dir)?;
        }
        Ok(())
    }

    /// Loads the pipeline configuration, writing a default file when none exists.
    ///
    /// A file that fails to parse is left untouched and defaults are used.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read or the default cannot be written.
    pub fn load_config(&self, path_override: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
        let config_path = path_override.map_or_else(
            || self.config_dir.join(CONFIG_FILE_NAME),
            Path::to_path_buf,
        );

        if !config_path.exists() {
            info!(
                "Config file not found at {:?}, creating default.",
                config_path
            );
            let default_config = PipelineConfig::default();
            Self::save_to_file(&config_path, &default_config)?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&config_path)?;
        match toml::from_str::<PipelineConfig>(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("Failed to parse config file: {}. Using defaults.", e);
                Ok(PipelineConfig::default())
            }
        }
    }

    /// Saves the pipeline configuration to the default location.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be written.
    pub fn save_config(&self, config: &PipelineConfig) -> Result<(), ConfigError> {
        Self::save_to_file(&self.config_dir.join(CONFIG_FILE_NAME), config)
    }

    fn save_to_file<T: serde::Serialize>(path: &Path, data: &T) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(data)?;

        let parent = path
            .parent()
            .ok_or_else(|| std::io::Error::other("Invalid path"))?;
        fs::create_dir_all(parent)?;
        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.persist(path).map_err(|e| e.error)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_config_dir_creates_directory() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("hunter");
        let storage = ConfigStorage::with_dir(config_path.clone());

        assert!(!config_path.exists());
        storage.ensure_config_dir().unwrap();
        assert!(config_path.exists());
    }

    #[test]
    fn test_load_config_creates_default_if_missing() {
        let dir = tempdir().unwrap();
        let storage = ConfigStorage::with_dir(dir.path().join("nested"));

        let config = storage.load_config(None).unwrap();
        assert_eq!(config.thread_count, 3);

        let config_file = dir.path().join("nested").join(CONFIG_FILE_NAME);
        assert!(config_file.exists());
    }

    #[test]
    fn test_load_config_handles_malformed_file() {
        let dir = tempdir().unwrap();
        let storage = ConfigStorage::with_dir(dir.path().to_path_buf());
        let config_file = dir.path().join(CONFIG_FILE_NAME);

        fs::write(&config_file, "thread_count = [").unwrap();

        let config = storage.load_config(None).unwrap();
        assert_eq!(config.thread_count, 3);
        let content = fs::read_to_string(&config_file).unwrap();
        assert_eq!(content, "thread_count = [");
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = tempdir().unwrap();
        let storage = ConfigStorage::with_dir(dir.path().to_path_buf());
        let config = PipelineConfig {
            thread_count: 8,
            logging_enabled: true,
            ..PipelineConfig::default()
        };

        storage.save_config(&config).unwrap();

        let loaded = storage.load_config(None).unwrap();
        assert_eq!(loaded.thread_count, 8);
        assert!(loaded.logging_enabled);
    }

    #[test]
    fn test_path_override() {
        let dir = tempdir().unwrap();
        let storage = ConfigStorage::with_dir(dir.path().join("unused"));
        let custom = dir.path().join("custom.toml");
        fs::write(&custom, "batch_delay_ms = 50\n").unwrap();

        let config = storage.load_config(Some(&custom)).unwrap();
        assert_eq!(config.batch_delay_ms, 50);
        assert!(!dir.path().join("unused").exists());
    }
}
