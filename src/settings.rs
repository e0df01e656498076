//! Process-wide runtime settings
//!
//! Read on every capture decision and every append, so each value is a plain
//! atomic. Writers update the atomic first and then persist the whole set to
//! `settings.json` in the storage directory; there is no transaction across
//! fields.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Result, TelemetryError};
use crate::filter::ChannelSwitches;
use crate::record::LogLevel;
use crate::store::Channel;

const SETTINGS_FILE: &str = "settings.json";

/// On-disk form of the settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PersistedSettings {
    log_level: LogLevel,
    max_log_store_size: u64,
    logs_enabled: bool,
    analytics_enabled: bool,
    #[serde(default)]
    fault_pending: bool,
}

impl From<&Config> for PersistedSettings {
    fn from(config: &Config) -> Self {
        Self {
            log_level: config.log_level,
            max_log_store_size: config.max_log_store_size,
            logs_enabled: config.logs_enabled,
            analytics_enabled: config.analytics_enabled,
            fault_pending: false,
        }
    }
}

/// Live settings shared by loggers, stores and the delivery coordinator
#[derive(Debug)]
pub struct Settings {
    log_level: AtomicU8,
    max_log_store_size: AtomicU64,
    logs_enabled: AtomicBool,
    analytics_enabled: AtomicBool,
    fault_pending: AtomicBool,
    /// Where settings are persisted; `None` keeps them in memory only
    path: Option<PathBuf>,
    /// Held from snapshot to rename so the file never lags behind memory
    persist_lock: Mutex<()>,
}

impl Settings {
    fn from_persisted(persisted: PersistedSettings, path: Option<PathBuf>) -> Self {
        Self {
            log_level: AtomicU8::new(persisted.log_level.rank()),
            max_log_store_size: AtomicU64::new(persisted.max_log_store_size),
            logs_enabled: AtomicBool::new(persisted.logs_enabled),
            analytics_enabled: AtomicBool::new(persisted.analytics_enabled),
            fault_pending: AtomicBool::new(persisted.fault_pending),
            path,
            persist_lock: Mutex::new(()),
        }
    }

    /// In-memory settings seeded from config, never written to disk
    pub fn in_memory(config: &Config) -> Self {
        Self::from_persisted(PersistedSettings::from(config), None)
    }

    /// Load persisted settings from the storage directory, seeding from config
    /// when nothing was persisted yet or the file is unreadable
    pub fn load(config: &Config) -> Self {
        let path = settings_path(&config.storage_dir);
        let persisted = match read_persisted(&path) {
            Ok(Some(persisted)) => persisted,
            Ok(None) => PersistedSettings::from(config),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable telemetry settings");
                PersistedSettings::from(config)
            }
        };
        Self::from_persisted(persisted, Some(path))
    }

    /// Most verbose severity still captured
    pub fn log_level(&self) -> LogLevel {
        LogLevel::from_rank(self.log_level.load(Ordering::Relaxed)).unwrap_or(LogLevel::None)
    }

    pub fn set_log_level(&self, level: LogLevel) -> Result<()> {
        self.log_level.store(level.rank(), Ordering::Relaxed);
        self.persist()
    }

    /// Byte cap shared by both channels
    pub fn max_log_store_size(&self) -> u64 {
        self.max_log_store_size.load(Ordering::Relaxed)
    }

    pub fn set_max_log_store_size(&self, bytes: u64) -> Result<()> {
        self.max_log_store_size.store(bytes, Ordering::Relaxed);
        self.persist()
    }

    /// Size an active file may reach before it is rotated
    pub fn channel_share(&self) -> u64 {
        self.max_log_store_size() / 2
    }

    pub fn channel_enabled(&self, channel: Channel) -> bool {
        self.flag(channel).load(Ordering::Relaxed)
    }

    pub fn set_channel_enabled(&self, channel: Channel, enabled: bool) -> Result<()> {
        self.flag(channel).store(enabled, Ordering::Relaxed);
        self.persist()
    }

    /// Current channel switches for the level filter
    pub fn switches(&self) -> ChannelSwitches {
        ChannelSwitches {
            logs_enabled: self.channel_enabled(Channel::Logs),
            analytics_enabled: self.channel_enabled(Channel::Analytics),
        }
    }

    /// Whether a fatal fault was captured and not yet delivered
    pub fn fault_pending(&self) -> bool {
        self.fault_pending.load(Ordering::Relaxed)
    }

    pub fn set_fault_pending(&self, pending: bool) -> Result<()> {
        self.fault_pending.store(pending, Ordering::Relaxed);
        self.persist()
    }

    fn flag(&self, channel: Channel) -> &AtomicBool {
        match channel {
            Channel::Logs => &self.logs_enabled,
            Channel::Analytics => &self.analytics_enabled,
        }
    }

    fn snapshot(&self) -> PersistedSettings {
        PersistedSettings {
            log_level: self.log_level(),
            max_log_store_size: self.max_log_store_size(),
            logs_enabled: self.channel_enabled(Channel::Logs),
            analytics_enabled: self.channel_enabled(Channel::Analytics),
            fault_pending: self.fault_pending(),
        }
    }

    /// Write the current values to disk (no-op for in-memory settings)
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let _persisting = self
            .persist_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Snapshot under the lock: whoever renames last wrote the newest values
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TelemetryError::storage(parent, e))?;
        }

        // Replace atomically so a crash never leaves a half-written file
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| TelemetryError::storage(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| TelemetryError::storage(path, e))?;
        Ok(())
    }
}

/// Path of the persisted settings inside a storage directory
pub fn settings_path(storage_dir: &Path) -> PathBuf {
    storage_dir.join(SETTINGS_FILE)
}

fn read_persisted(path: &Path) -> Result<Option<PersistedSettings>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(|e| TelemetryError::storage(path, e))?;
    Ok(Some(serde_json::from_str(&content)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_seeded_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::with_storage_dir(temp_dir.path());
        config.log_level = LogLevel::Error;
        config.max_log_store_size = 2000;
        config.analytics_enabled = false;

        let settings = Settings::load(&config);
        assert_eq!(settings.log_level(), LogLevel::Error);
        assert_eq!(settings.channel_share(), 1000);
        assert!(!settings.channel_enabled(Channel::Analytics));
        assert!(settings.channel_enabled(Channel::Logs));
        assert!(!settings.fault_pending());
    }

    #[test]
    fn test_setters_persist_across_reload() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_storage_dir(temp_dir.path());

        let settings = Settings::load(&config);
        settings.set_log_level(LogLevel::Debug).unwrap();
        settings.set_max_log_store_size(500).unwrap();
        settings.set_channel_enabled(Channel::Logs, false).unwrap();
        settings.set_fault_pending(true).unwrap();

        let reloaded = Settings::load(&config);
        assert_eq!(reloaded.log_level(), LogLevel::Debug);
        assert_eq!(reloaded.max_log_store_size(), 500);
        assert!(!reloaded.channel_enabled(Channel::Logs));
        assert!(reloaded.fault_pending());
    }

    #[test]
    fn test_persisted_settings_win_over_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_storage_dir(temp_dir.path());
        Settings::load(&config).set_log_level(LogLevel::Fatal).unwrap();

        let mut changed = config.clone();
        changed.log_level = LogLevel::Debug;
        assert_eq!(Settings::load(&changed).log_level(), LogLevel::Fatal);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_config() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(settings_path(temp_dir.path()), "{not json").unwrap();

        let config = Config::with_storage_dir(temp_dir.path());
        let settings = Settings::load(&config);
        assert_eq!(settings.log_level(), config.log_level);
    }

    #[test]
    fn test_corrupt_file_is_a_serialization_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = settings_path(temp_dir.path());
        std::fs::write(&path, "{\"log_level\": \"loud\"}").unwrap();

        let err = read_persisted(&path).unwrap_err();
        assert!(matches!(err, TelemetryError::Serialization(_)));
        assert!(err.to_string().starts_with("serialization failed"));
    }

    #[test]
    fn test_concurrent_setters_all_persist() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_storage_dir(temp_dir.path());
        let settings = std::sync::Arc::new(Settings::load(&config));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let settings = std::sync::Arc::clone(&settings);
                std::thread::spawn(move || {
                    (0..200)
                        .filter(|i| settings.set_fault_pending((i + t) % 2 == 0).is_err())
                        .count()
                })
            })
            .collect();
        let errors: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(errors, 0);

        // The file matches memory once the writers are done
        settings.set_log_level(LogLevel::Warn).unwrap();
        let reloaded = Settings::load(&config);
        assert_eq!(reloaded.fault_pending(), settings.fault_pending());
        assert_eq!(reloaded.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_in_memory_settings_do_not_touch_disk() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_storage_dir(temp_dir.path());

        let settings = Settings::in_memory(&config);
        settings.set_log_level(LogLevel::Warn).unwrap();
        assert!(!settings_path(temp_dir.path()).exists());
        assert_eq!(settings.log_level(), LogLevel::Warn);
    }
}
