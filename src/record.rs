//! Record model
//!
//! A record is created once per logging call and never changes afterwards.
//! On disk and on the wire every record is one self-contained JSON object.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Free-form metadata attached to a record
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Record severity
///
/// Ranks increase with verbosity: `Fatal` is the most severe, `Debug` the
/// least. `Analytics` is not a severity; it marks records for the analytics
/// channel and sits below the severity ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None = 0,
    Analytics = 1,
    Fatal = 2,
    Error = 3,
    Warn = 4,
    Info = 5,
    Debug = 6,
}

impl LogLevel {
    /// All levels in rank order
    pub const ALL: [LogLevel; 7] = [
        LogLevel::None,
        LogLevel::Analytics,
        LogLevel::Fatal,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
    ];

    /// Numeric rank of this level
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Level for a rank, if the rank is known
    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.get(rank as usize).copied()
    }

    /// Symbolic name, as written to disk
    pub fn name(self) -> &'static str {
        match self {
            LogLevel::None => "none",
            LogLevel::Analytics => "analytics",
            LogLevel::Fatal => "fatal",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }

    /// Whether this level is a real severity (not `None` and not `Analytics`)
    pub fn is_severity(self) -> bool {
        !matches!(self, LogLevel::None | LogLevel::Analytics)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|level| level.name() == lower)
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

/// A single captured log or analytics entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// UTC creation time with millisecond precision
    pub timestamp: String,
    pub level: LogLevel,
    /// Name of the logger that produced the record
    #[serde(rename = "pkg")]
    pub logger_name: String,
    #[serde(rename = "msg")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Record {
    /// Create a record stamped with the current time
    pub fn new(
        level: LogLevel,
        logger_name: impl Into<String>,
        message: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Self {
        Self::at(Utc::now(), level, logger_name, message, metadata)
    }

    /// Create a record with an explicit timestamp
    pub fn at(
        time: DateTime<Utc>,
        level: LogLevel,
        logger_name: impl Into<String>,
        message: impl Into<String>,
        metadata: Option<Metadata>,
    ) -> Self {
        Self {
            timestamp: format_timestamp(time),
            level,
            logger_name: logger_name.into(),
            message: message.into(),
            metadata,
        }
    }

    /// Encode as one line of newline-delimited JSON (without the newline)
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Format a timestamp the way records carry it: `2026-10-18T09:30:00.123Z`
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
