//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file. Command-line flags override
//! whatever the file says.

use std::path::{Path, PathBuf};

use bytesize::ByteSize;
use path_fuse::fs::adapter::AdapterOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

fn runtime_dir() -> Option<PathBuf> {
    if let Some(path) = dirs::runtime_dir() {
        return Some(path.join("path-fuse"));
    }

    dirs::home_dir().map(|home| home.join(".local").join("share").join("path-fuse"))
}

fn default_mount_point() -> PathBuf {
    runtime_dir().map_or_else(|| PathBuf::from("/tmp/path-fuse/mnt"), |rd| rd.join("mnt"))
}

fn byte_size_to_usize(size: ByteSize) -> usize {
    usize::try_from(size.as_u64()).unwrap_or(usize::MAX)
}

/// Directory staging knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AdapterConfig {
    /// Capacity each open directory's buffer starts with.
    pub initial_dir_buffer: ByteSize,

    /// A listing larger than this is served truncated.
    pub max_dir_buffer: ByteSize,

    /// Bytes of encoded entries handed to the kernel per readdir call.
    pub readdir_page_size: ByteSize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            initial_dir_buffer: ByteSize::b(256),
            max_dir_buffer: ByteSize::mib(64),
            readdir_page_size: ByteSize::kib(4),
        }
    }
}

impl AdapterConfig {
    /// The adapter options these settings describe.
    pub fn options(&self) -> AdapterOptions {
        AdapterOptions {
            initial_dir_buffer: byte_size_to_usize(self.initial_dir_buffer),
            max_dir_buffer: byte_size_to_usize(self.max_dir_buffer),
        }
    }

    pub fn readdir_page_size(&self) -> usize {
        byte_size_to_usize(self.readdir_page_size)
    }
}

/// Mount options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FuseConfig {
    /// Let users other than the mounting one see the filesystem.
    pub allow_other: bool,

    /// Ask the kernel to unmount when the process dies.
    pub auto_unmount: bool,
}

impl Default for FuseConfig {
    fn default() -> Self {
        Self {
            allow_other: false,
            auto_unmount: true,
        }
    }
}

/// Application configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// The host directory to serve.
    #[serde(default)]
    pub source: Option<PathBuf>,

    /// The mount point for the filesystem.
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,

    #[serde(default)]
    pub adapter: AdapterConfig,

    #[serde(default)]
    pub fuse: FuseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: None,
            mount_point: default_mount_point(),
            adapter: AdapterConfig::default(),
            fuse: FuseConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing every problem found otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        match &self.source {
            None => errors.push("No source directory configured.".to_owned()),
            Some(source) if !source.is_dir() => {
                errors.push(format!(
                    "Source '{}' is not a directory.",
                    source.display()
                ));
            }
            Some(source) if source == &self.mount_point => {
                errors.push(format!(
                    "Source and mount point are both '{}'.",
                    source.display()
                ));
            }
            Some(_) => {}
        }

        if !self.mount_point.is_absolute() {
            errors.push(format!(
                "Mount point '{}' is not an absolute path.",
                self.mount_point.display()
            ));
        }

        let adapter = &self.adapter;
        if adapter.max_dir_buffer.as_u64() == 0 {
            errors.push("adapter.max-dir-buffer must be greater than zero.".to_owned());
        }
        if adapter.initial_dir_buffer > adapter.max_dir_buffer {
            errors.push(format!(
                "adapter.initial-dir-buffer ({}) exceeds adapter.max-dir-buffer ({}).",
                adapter.initial_dir_buffer, adapter.max_dir_buffer
            ));
        }
        if adapter.readdir_page_size.as_u64() == 0 {
            errors.push("adapter.readdir-page-size must be greater than zero.".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("path-fuse").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("path-fuse").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/path-fuse/config.toml"));

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Loads configuration from the external path if given, else from the first config file
    /// found. Falls back to defaults when there is no file at all.
    ///
    /// Errors if a config file exists but is malformed.
    pub fn load(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = external_config_path {
            return Self::load_from_file(path);
        }

        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path),
            None => {
                debug!("No configuration file found, using defaults.");
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.source, None);
        assert_eq!(config.adapter, AdapterConfig::default());
        assert_eq!(config.fuse, FuseConfig::default());
        assert_eq!(config.adapter.options(), AdapterOptions::default());
        assert_eq!(config.adapter.readdir_page_size(), 4096);
    }

    #[test]
    fn parses_kebab_case_keys() {
        let config: Config = toml::from_str(
            r#"
            source = "/srv/data"
            mount-point = "/mnt/data"

            [adapter]
            initial-dir-buffer = "1 KiB"
            max-dir-buffer = "2 MiB"

            [fuse]
            allow-other = true
            "#,
        )
        .unwrap();

        assert_eq!(config.source, Some(PathBuf::from("/srv/data")));
        assert_eq!(config.mount_point, PathBuf::from("/mnt/data"));
        assert_eq!(config.adapter.initial_dir_buffer, ByteSize::kib(1));
        assert_eq!(config.adapter.max_dir_buffer, ByteSize::mib(2));
        assert_eq!(config.adapter.readdir_page_size, ByteSize::kib(4));
        assert!(config.fuse.allow_other);
        assert!(config.fuse.auto_unmount);
    }

    #[test]
    fn rejects_missing_source() {
        let errors = Config::default().validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("No source")));
    }

    #[test]
    fn rejects_initial_buffer_larger_than_max() {
        let config = Config {
            source: Some(std::env::temp_dir()),
            mount_point: PathBuf::from("/nonexistent/path-fuse-test/mnt"),
            adapter: AdapterConfig {
                initial_dir_buffer: ByteSize::kib(8),
                max_dir_buffer: ByteSize::kib(4),
                ..AdapterConfig::default()
            },
            fuse: FuseConfig::default(),
        };

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("initial-dir-buffer"));
    }

    #[test]
    fn accepts_complete_config() {
        let config = Config {
            source: Some(std::env::temp_dir()),
            mount_point: PathBuf::from("/nonexistent/path-fuse-test/mnt"),
            ..Config::default()
        };
        assert_eq!(config.validate(), Ok(()));
    }
}
