//! Configuration management for the FileVault daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/filevault/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::{
    validate_segment, MissingDirectory, TenancyMode, DEFAULT_FOLDERS, DEFAULT_MAX_FILE_SIZE,
};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("storage root must not be empty")]
    EmptyRoot,

    #[error("max_file_size must be greater than 0, got {0}")]
    InvalidMaxFileSize(u64),

    #[error("max_batch_items must be between 1 and 100000, got {0}")]
    InvalidMaxBatchItems(usize),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("default folder is not a valid name: {0:?}")]
    InvalidFolderName(String),

    #[error("request_timeout_secs must be between 1 and 3600, got {0}")]
    InvalidRequestTimeout(u64),

    #[error("socket_path must not be empty")]
    EmptySocketPath,
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the FileVault daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Storage layout and policy.
    pub storage: StorageConfig,

    /// Upload limits.
    pub upload: UploadConfig,

    /// Socket server settings.
    pub server: ServerConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for daemon state such as log files.
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Write a daily rolling log under `data_dir/logs` when serving.
    pub log_to_file: bool,
}

/// Storage layout and policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory (single tenancy) or base of per-identity roots.
    pub root: PathBuf,

    /// Whether callers share one root or each identity gets its own.
    pub tenancy: TenancyMode,

    /// What listing a missing directory does.
    pub missing_directory: MissingDirectory,

    /// Folders created when a root is provisioned.
    pub default_folders: Vec<String>,
}

/// Upload limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum size of a single uploaded file in bytes (default: 500MB).
    pub max_file_size: u64,

    /// Maximum number of files in one upload batch.
    pub max_batch_items: usize,
}

/// Socket server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket the server listens on.
    pub socket_path: PathBuf,

    /// Client-side timeout for a single request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_to_file: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_data_dir().join("storage"),
            tenancy: TenancyMode::Single,
            missing_directory: MissingDirectory::Fail,
            default_folders: DEFAULT_FOLDERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_batch_items: 1000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            request_timeout_secs: 30,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filevault")
        .join("config.toml")
}

/// Returns the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/filevault/storage.sock`, falling back to the
/// system temp directory.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("filevault")
        .join("storage.sock")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filevault")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - FILEVAULT_ROOT: Override the storage root
    /// - FILEVAULT_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - FILEVAULT_SOCKET: Override the server socket path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("FILEVAULT_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding storage root from environment: {}", root);
                self.storage.root = PathBuf::from(root);
            }
        }

        if let Ok(level) = std::env::var("FILEVAULT_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(socket) = std::env::var("FILEVAULT_SOCKET") {
            if !socket.is_empty() {
                tracing::info!("Overriding socket_path from environment: {}", socket);
                self.server.socket_path = PathBuf::from(socket);
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRoot);
        }

        if self.upload.max_file_size == 0 {
            return Err(ConfigError::InvalidMaxFileSize(self.upload.max_file_size));
        }

        if self.upload.max_batch_items < 1 || self.upload.max_batch_items > 100_000 {
            return Err(ConfigError::InvalidMaxBatchItems(
                self.upload.max_batch_items,
            ));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        for folder in &self.storage.default_folders {
            if validate_segment(folder).is_err() {
                return Err(ConfigError::InvalidFolderName(folder.clone()));
            }
        }

        if self.server.request_timeout_secs == 0 || self.server.request_timeout_secs > 3600 {
            return Err(ConfigError::InvalidRequestTimeout(
                self.server.request_timeout_secs,
            ));
        }

        if self.server.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptySocketPath);
        }

        Ok(())
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.daemon.data_dir.join("logs")
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var("FILEVAULT_ROOT");
        std::env::remove_var("FILEVAULT_LOG_LEVEL");
        std::env::remove_var("FILEVAULT_SOCKET");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert!(!config.daemon.log_to_file);
        assert_eq!(config.storage.tenancy, TenancyMode::Single);
        assert_eq!(config.storage.missing_directory, MissingDirectory::Fail);
        assert_eq!(
            config.storage.default_folders,
            ["Documents", "Pictures", "Videos", "Downloads"]
        );
        assert_eq!(config.upload.max_file_size, 524_288_000);
        assert_eq!(config.upload.max_batch_items, 1000);
        assert_eq!(config.server.request_timeout_secs, 30);
        assert!(config.server.socket_path.ends_with("filevault/storage.sock"));
    }

    #[test]
    fn test_default_paths() {
        let config = Config::default();
        assert!(config.daemon.data_dir.to_string_lossy().contains("filevault"));
        assert!(config.storage.root.ends_with("filevault/storage"));
        assert!(config.log_dir().ends_with("logs"));
        assert!(default_config_path().ends_with("filevault/config.toml"));
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
data_dir = "/var/lib/filevault"
log_level = "debug"
log_to_file = true

[storage]
root = "/srv/vault"
tenancy = "per_identity"
missing_directory = "create"
default_folders = ["Inbox"]

[upload]
max_file_size = 1024
max_batch_items = 5

[server]
socket_path = "/run/filevault.sock"
request_timeout_secs = 10
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.data_dir, PathBuf::from("/var/lib/filevault"));
        assert!(config.daemon.log_to_file);
        assert_eq!(config.storage.root, PathBuf::from("/srv/vault"));
        assert_eq!(config.storage.tenancy, TenancyMode::PerIdentity);
        assert_eq!(config.storage.missing_directory, MissingDirectory::Create);
        assert_eq!(config.storage.default_folders, ["Inbox"]);
        assert_eq!(config.upload.max_file_size, 1024);
        assert_eq!(config.upload.max_batch_items, 5);
        assert_eq!(config.server.socket_path, PathBuf::from("/run/filevault.sock"));
        assert_eq!(config.server.request_timeout_secs, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[upload]
max_file_size = 2048
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.upload.max_file_size, 2048);
        assert_eq!(config.upload.max_batch_items, 1000);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_from_toml_invalid_tenancy() {
        let result = Config::from_toml("[storage]\ntenancy = \"shared\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let err = Config::from_toml("[upload\nmax_file_size = 1").unwrap_err();
        assert!(err.to_string().contains("Invalid TOML configuration"));
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.storage.tenancy = TenancyMode::PerIdentity;
        config.upload.max_batch_items = 7;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let config = Config::load(temp.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "not = [valid").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse config file"));
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.storage.root = PathBuf::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyRoot));

        let mut config = Config::default();
        config.upload.max_file_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxFileSize(0)));

        let mut config = Config::default();
        config.upload.max_batch_items = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxBatchItems(0)));

        let mut config = Config::default();
        config.daemon.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );

        let mut config = Config::default();
        config.storage.default_folders = vec!["ok".to_string(), "../bad".to_string()];
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidFolderName("../bad".to_string()))
        );

        let mut config = Config::default();
        config.server.request_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidRequestTimeout(0)));
    }

    #[test]
    fn test_validate_log_level_case_insensitive() {
        let mut config = Config::default();
        config.daemon.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_override_root_and_socket() {
        clear_env();
        std::env::set_var("FILEVAULT_ROOT", "/tmp/vault-root");
        std::env::set_var("FILEVAULT_SOCKET", "/tmp/vault.sock");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.storage.root, PathBuf::from("/tmp/vault-root"));
        assert_eq!(config.server.socket_path, PathBuf::from("/tmp/vault.sock"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        clear_env();
        std::env::set_var("FILEVAULT_LOG_LEVEL", "trace");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "trace");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("FILEVAULT_ROOT", "");

        let mut config = Config::default();
        let original = config.storage.root.clone();
        config.apply_env_overrides();
        assert_eq!(config.storage.root, original);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        clear_env();

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());
    }
}
