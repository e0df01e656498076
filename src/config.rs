//! Configuration management for courier

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::record::LogLevel;

/// Categories of disk errors for user-friendly messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskErrorKind {
    /// Disk is full or quota exceeded
    DiskFull,
    /// Permission denied (read or write)
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// Other IO error
    Other,
}

impl DiskErrorKind {
    /// Get a user-friendly message for this error kind
    pub fn user_message(&self) -> &'static str {
        match self {
            DiskErrorKind::DiskFull => "Disk full - buffered telemetry cannot grow",
            DiskErrorKind::PermissionDenied => "Permission denied on the storage directory",
            DiskErrorKind::NotFound => "File or directory not found",
            DiskErrorKind::Other => "Storage operation failed",
        }
    }
}

/// Categorize an IO error into a user-friendly category
pub fn categorize_io_error(e: &std::io::Error) -> DiskErrorKind {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::StorageFull | ErrorKind::WriteZero => DiskErrorKind::DiskFull,
        ErrorKind::PermissionDenied => DiskErrorKind::PermissionDenied,
        ErrorKind::NotFound => DiskErrorKind::NotFound,
        _ => {
            #[cfg(unix)]
            {
                if let Some(os_error) = e.raw_os_error() {
                    // ENOSPC = 28, EDQUOT = 122 (Linux) / 69 (macOS)
                    if os_error == 28 || os_error == 122 || os_error == 69 {
                        return DiskErrorKind::DiskFull;
                    }
                    // EACCES
                    if os_error == 13 {
                        return DiskErrorKind::PermissionDenied;
                    }
                }
            }
            DiskErrorKind::Other
        }
    }
}

/// Describe an IO error, falling back to the raw error text for uncategorized failures
pub fn describe_io_error(e: &std::io::Error) -> String {
    match categorize_io_error(e) {
        DiskErrorKind::Other => e.to_string(),
        kind => kind.user_message().to_string(),
    }
}

/// Client configuration
///
/// Loaded from `~/.courier/config.toml`. The level filter, store size and
/// channel flags only seed the runtime settings; once `settings.json` exists
/// in the storage directory it takes precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the collector (e.g. "https://collector.example.com")
    #[serde(default)]
    pub collector_url: Option<String>,

    /// Application key identifying this client to the collector
    #[serde(default)]
    pub app_key: Option<String>,

    /// Static bearer token, used when no other authorizer is supplied
    #[serde(default)]
    pub api_token: Option<String>,

    /// Directory holding the channel files and persisted settings
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Most verbose severity that is still captured (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Byte cap shared by both channels; each active file gets half (default: 1 MiB)
    #[serde(default = "default_max_log_store_size")]
    pub max_log_store_size: u64,

    /// Whether regular log records are captured
    #[serde(default = "default_enabled")]
    pub logs_enabled: bool,

    /// Whether analytics records are captured
    #[serde(default = "default_enabled")]
    pub analytics_enabled: bool,

    /// Timeout for a single upload request in seconds (default: 30)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_storage_dir() -> PathBuf {
    config_dir().join("store")
}

fn default_log_level() -> LogLevel {
    LogLevel::Debug
}

fn default_max_log_store_size() -> u64 {
    1024 * 1024
}

fn default_enabled() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collector_url: None,
            app_key: None,
            api_token: None,
            storage_dir: default_storage_dir(),
            log_level: default_log_level(),
            max_log_store_size: default_max_log_store_size(),
            logs_enabled: default_enabled(),
            analytics_enabled: default_enabled(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from file, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Create a config rooted at a specific storage directory (for testing and embedding)
    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }
}

/// Get the base configuration directory (~/.courier)
/// Falls back to ./.courier if home directory cannot be determined
pub fn config_dir() -> PathBuf {
    try_config_dir().unwrap_or_else(|| {
        tracing::warn!("Could not determine home directory, using current directory for config");
        PathBuf::from(".courier")
    })
}

/// Try to get the base configuration directory, returning None if home dir is unavailable
pub fn try_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".courier"))
}

/// Get the path to the config file
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Get the path to the diagnostics log directory
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Ensure all required directories exist
pub fn ensure_directories(config: &Config) -> Result<()> {
    std::fs::create_dir_all(config_dir()).context("Failed to create config directory")?;
    std::fs::create_dir_all(&config.storage_dir)
        .context("Failed to create telemetry storage directory")?;
    std::fs::create_dir_all(logs_dir()).context("Failed to create logs directory")?;
    Ok(())
}
