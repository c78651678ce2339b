//! Backend configuration.
//!
//! Loaded from TOML:
//!
//! ```toml
//! root = "~/projects/sandbox"
//! read_only = false
//! chunk_size = 65536
//!
//! [watch]
//! poll_interval_ms = 500
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::vfs::DEFAULT_CHUNK_SIZE;

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for a [`LocalBackend`](crate::vfs::LocalBackend).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Jail root. `~` is expanded on load.
    pub root: PathBuf,
    #[serde(default)]
    pub read_only: bool,
    /// Read-stream chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Poll interval used when the platform watcher falls back to polling.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl BackendConfig {
    /// Config for `root` with every other field at its default.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: expand(&root.into()),
            read_only: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            watch: WatchConfig::default(),
        }
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let mut config: BackendConfig = toml::from_str(text)?;
        config.root = expand(&config.root);
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("root must not be empty".into()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".into()));
        }
        Ok(())
    }
}

fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    shellexpand::tilde(&raw).as_ref().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BackendConfig::from_toml(r#"root = "/srv/jail""#).unwrap();
        assert_eq!(config.root, PathBuf::from("/srv/jail"));
        assert!(!config.read_only);
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.watch.poll_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_full() {
        let config = BackendConfig::from_toml(
            r#"
            root = "/data"
            read_only = true
            chunk_size = 4096

            [watch]
            poll_interval_ms = 50
            "#,
        )
        .unwrap();
        assert!(config.read_only);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.watch.poll_interval_ms, 50);
    }

    #[test]
    fn test_tilde_expansion() {
        let config = BackendConfig::from_toml(r#"root = "~/sandbox""#).unwrap();
        assert!(!config.root.starts_with("~"));
        assert!(config.root.ends_with("sandbox"));
    }

    #[test]
    fn test_rejects_zero_chunk() {
        let err = BackendConfig::from_toml("root = \"/x\"\nchunk_size = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let err = BackendConfig::from_toml("root = \"/x\"\nmount = \"/y\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = BackendConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
