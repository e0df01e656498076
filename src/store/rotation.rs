//! Appending and rotation
//!
//! Before each append the active file is measured. Once it has grown past the
//! channel's share of the store quota it is renamed over the overflow file,
//! discarding whatever overflow held, and the record starts a fresh active
//! file.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use tracing::debug;

use super::{ChannelPaths, ChannelStore};
use crate::error::{Result, TelemetryError};
use crate::record::Record;

impl ChannelStore {
    /// Append a record to the active file, rotating first if it is over quota
    ///
    /// On error the record is dropped; files already on disk are left as they were.
    pub fn append(&self, record: &Record) -> Result<()> {
        let mut line = record.to_json_line()?;
        line.push('\n');

        let _io = self.lock_io();
        if rotate_if_needed(&self.paths, self.settings.channel_share())? {
            debug!(channel = %self.channel, "Rotated active file into overflow");
        }
        append_line(&self.paths.active, &line)
    }
}

/// Move an over-quota active file onto the overflow slot
///
/// Returns whether a rotation happened.
fn rotate_if_needed(paths: &ChannelPaths, share: u64) -> Result<bool> {
    let size = match std::fs::metadata(&paths.active) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(TelemetryError::storage(&paths.active, e)),
    };
    if size <= share {
        return Ok(false);
    }

    std::fs::rename(&paths.active, &paths.overflow)
        .map_err(|e| TelemetryError::storage(&paths.overflow, e))?;
    Ok(true)
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let open = || OpenOptions::new().create(true).append(true).open(path);
    let mut file = match open() {
        Ok(file) => file,
        // Storage directory removed underneath us (e.g. cache cleared); recreate it once
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| TelemetryError::storage(parent, e))?;
            }
            open().map_err(|e| TelemetryError::storage(path, e))?
        }
        Err(e) => return Err(TelemetryError::storage(path, e)),
    };
    file.write_all(line.as_bytes())
        .map_err(|e| TelemetryError::storage(path, e))
}
