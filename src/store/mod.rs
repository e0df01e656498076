//! Channel storage
//!
//! Each channel keeps up to three files in the storage directory:
//!
//! - `<prefix>.log`: the active file, receives new records
//! - `<prefix>.log.overflow`: records displaced by the last rotation
//! - `<prefix>.log.send`: the snapshot handed to the collector
//!
//! All file mutations for a channel go through its I/O context (a mutex owned
//! by the [`ChannelStore`]), so rotation and buffer swaps never interleave
//! with appends from other threads.

mod rotation;
mod swap;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};
use crate::settings::Settings;

/// Independent record stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Logs,
    Analytics,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Logs, Channel::Analytics];

    /// File name prefix used in the storage directory
    pub fn file_prefix(self) -> &'static str {
        match self {
            Channel::Logs => "courier",
            Channel::Analytics => "courier-analytics",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Logs => "logs",
            Channel::Analytics => "analytics",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Paths of a channel's file triple
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    pub active: PathBuf,
    pub overflow: PathBuf,
    pub buffer: PathBuf,
}

impl ChannelPaths {
    pub fn new(storage_dir: &Path, channel: Channel) -> Self {
        let base = format!("{}.log", channel.file_prefix());
        Self {
            active: storage_dir.join(&base),
            overflow: storage_dir.join(format!("{base}.overflow")),
            buffer: storage_dir.join(format!("{base}.send")),
        }
    }
}

/// Snapshot of a channel's files, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStatus {
    pub channel: Channel,
    pub active_bytes: u64,
    pub overflow_bytes: u64,
    pub buffer_bytes: u64,
    /// A buffer file exists: an upload is in progress or must be retried
    pub pending_delivery: bool,
}

/// Persistent storage for one channel
#[derive(Debug)]
pub struct ChannelStore {
    channel: Channel,
    paths: ChannelPaths,
    settings: Arc<Settings>,
    /// Serializes every file operation on this channel
    io: Mutex<()>,
}

impl ChannelStore {
    /// Open the store for a channel, creating the storage directory if needed
    pub fn open(channel: Channel, storage_dir: &Path, settings: Arc<Settings>) -> Result<Self> {
        std::fs::create_dir_all(storage_dir)
            .map_err(|e| TelemetryError::storage(storage_dir, e))?;
        Ok(Self {
            channel,
            paths: ChannelPaths::new(storage_dir, channel),
            settings,
            io: Mutex::new(()),
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn paths(&self) -> &ChannelPaths {
        &self.paths
    }

    /// Current sizes of the channel's files
    pub fn status(&self) -> ChannelStatus {
        let _io = self.lock_io();
        let buffer_len = file_len(&self.paths.buffer);
        ChannelStatus {
            channel: self.channel,
            active_bytes: file_len(&self.paths.active).unwrap_or(0),
            overflow_bytes: file_len(&self.paths.overflow).unwrap_or(0),
            buffer_bytes: buffer_len.unwrap_or(0),
            pending_delivery: buffer_len.is_some(),
        }
    }

    /// Enter the channel's I/O context
    ///
    /// A panic while holding the lock leaves the files themselves consistent
    /// (every step is a single rename, write or delete), so poisoning is ignored.
    fn lock_io(&self) -> MutexGuard<'_, ()> {
        self.io.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Length of a file, `None` if it does not exist or cannot be inspected
fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}
