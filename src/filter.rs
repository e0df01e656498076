//! Level filter
//!
//! Decides whether a logging call produces a record at all. Severity levels
//! pass when they are at least as severe as the configured filter, so a
//! filter of `Warn` keeps `Fatal`, `Error` and `Warn` and drops `Info` and
//! `Debug`. A filter of `None` silences every severity. Analytics records
//! ignore the rank filter and only honour the analytics channel switch.

use crate::record::LogLevel;

/// Channel switches consulted by the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSwitches {
    pub logs_enabled: bool,
    pub analytics_enabled: bool,
}

impl Default for ChannelSwitches {
    fn default() -> Self {
        Self {
            logs_enabled: true,
            analytics_enabled: true,
        }
    }
}

/// Whether a record at `level` is captured under `filter`
pub fn should_capture(level: LogLevel, filter: LogLevel, switches: ChannelSwitches) -> bool {
    match level {
        LogLevel::None => false,
        LogLevel::Analytics => switches.analytics_enabled,
        _ => switches.logs_enabled && filter.is_severity() && level.rank() <= filter.rank(),
    }
}
