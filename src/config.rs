//! Configuration management for Notebook Preview
//!
//! Handles loading, saving, and managing the preview pipeline configuration:
//! image cache bounds, network timeouts, render debounce and sidecar behaviour.
//! Configuration is persisted as JSON in the user's configuration directory.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier following reverse-DNS convention
pub const APP_ID: &str = "com.cosmic.Notebook";

/// Name of the configuration file inside the configuration directory
pub const CONFIG_FILE_NAME: &str = "preview.json";

/// Maximum number of decoded local images kept in memory
pub const DEFAULT_MAX_LOCAL_CACHE: usize = 100;

/// Maximum number of decoded remote images kept in memory
pub const DEFAULT_MAX_REMOTE_CACHE: usize = 50;

/// Connect/first-byte timeout for remote images, in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Total timeout for a remote image download, in seconds
pub const DEFAULT_RESOURCE_TIMEOUT_SECS: u64 = 60;

/// Largest remote image body accepted (10 MB)
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Quiet period before a text edit triggers a re-render, in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Preview pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Image loader configuration
    pub loader: LoaderConfig,

    /// Render scheduling configuration
    pub render: RenderConfig,

    /// Sidecar asset directory configuration
    pub sidecar: SidecarConfig,
}

impl Config {
    /// Load configuration from the user's configuration directory or return defaults
    pub fn load() -> ConfigResult<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::LoadError(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to the user's configuration directory
    pub fn save(&self) -> ConfigResult<()> {
        let dir = Self::config_dir()?;
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::SaveError(e.to_string()))?;
        self.save_to(dir.join(CONFIG_FILE_NAME))
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SaveError(e.to_string()))?;
        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::SaveError(e.to_string()))
    }

    /// Get the configuration directory path
    pub fn config_dir() -> ConfigResult<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join(APP_ID))
            .ok_or(ConfigError::DirectoryError)
    }
}

/// Image loader configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum entries in the local image cache
    pub max_local_cache: usize,

    /// Maximum entries in the remote image cache
    pub max_remote_cache: usize,

    /// Timeout until the first byte of a remote response, in seconds
    pub request_timeout_secs: u64,

    /// Timeout for a whole remote download, in seconds
    pub resource_timeout_secs: u64,

    /// Remote bodies larger than this are rejected
    pub max_download_bytes: u64,

    /// User-Agent header sent with remote requests
    pub user_agent: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_local_cache: DEFAULT_MAX_LOCAL_CACHE,
            max_remote_cache: DEFAULT_MAX_REMOTE_CACHE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            resource_timeout_secs: DEFAULT_RESOURCE_TIMEOUT_SECS,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            user_agent: format!("notebook-preview/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl LoaderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_secs(self.resource_timeout_secs)
    }
}

/// Render scheduling configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Debounce interval in milliseconds
    pub debounce_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
        }
    }
}

impl RenderConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Sidecar asset directory configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Watch the sidecar directory for external changes
    pub watch_directory: bool,

    /// Extension appended to image names that have none
    pub default_extension: String,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            watch_directory: true,
            default_extension: "png".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.loader.max_local_cache, 100);
        assert_eq!(config.loader.max_remote_cache, 50);
        assert_eq!(config.render.debounce(), Duration::from_millis(500));
        assert_eq!(config.loader.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.loader.resource_timeout(), Duration::from_secs(60));
        assert!(config.sidecar.watch_directory);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"render": {"debounce_ms": 250}}"#).unwrap();
        assert_eq!(config.render.debounce_ms, 250);
        assert_eq!(config.loader.max_local_cache, DEFAULT_MAX_LOCAL_CACHE);
    }

    #[test]
    fn test_save_and_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = Config::default();
        config.loader.max_remote_cache = 7;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.loader.max_remote_cache, 7);
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::ParseError(_))));
    }
}
