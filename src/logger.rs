//! Named loggers
//!
//! Every logging call funnels into [`Logger::record`]: level filter, console
//! echo through `tracing`, then an append to the channel store. Storage
//! failures drop the record and never reach the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::fault::FaultReport;
use crate::filter::should_capture;
use crate::record::{LogLevel, Metadata, Record};
use crate::settings::Settings;
use crate::store::{Channel, ChannelStore};

/// Target of the console echo for captured records
pub const RECORD_TARGET: &str = "courier::record";

/// Shared path from a logging call to disk
#[derive(Debug)]
pub(crate) struct Pipeline {
    settings: Arc<Settings>,
    logs: Arc<ChannelStore>,
    analytics: Arc<ChannelStore>,
    closed: AtomicBool,
}

impl Pipeline {
    pub(crate) fn new(
        settings: Arc<Settings>,
        logs: Arc<ChannelStore>,
        analytics: Arc<ChannelStore>,
    ) -> Self {
        Self {
            settings,
            logs,
            analytics,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn store(&self, channel: Channel) -> &ChannelStore {
        match channel {
            Channel::Logs => &self.logs,
            Channel::Analytics => &self.analytics,
        }
    }

    fn store_for(&self, level: LogLevel) -> &ChannelStore {
        if level == LogLevel::Analytics {
            &self.analytics
        } else {
            &self.logs
        }
    }

    /// Filter, echo and persist one record; returns whether it was persisted
    fn capture(
        &self,
        level: LogLevel,
        logger_name: &str,
        message: &str,
        metadata: Option<Metadata>,
    ) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if !should_capture(level, self.settings.log_level(), self.settings.switches()) {
            return false;
        }
        self.persist(Record::new(level, logger_name, message, metadata))
    }

    /// Write the fatal record for an uncaught fault and flag it for the next start
    ///
    /// Bypasses the level filter; only a disabled logs channel suppresses it.
    pub(crate) fn capture_fault(&self, logger_name: &str, report: &FaultReport) {
        if self.closed.load(Ordering::SeqCst) || !self.settings.switches().logs_enabled {
            return;
        }
        let metadata = report.metadata();
        let record = Record::new(
            LogLevel::Fatal,
            logger_name,
            &report.message,
            (!metadata.is_empty()).then_some(metadata),
        );
        if self.persist(record) {
            if let Err(e) = self.settings.set_fault_pending(true) {
                warn!(error = %e, "Failed to persist pending fault flag");
            }
        }
    }

    fn persist(&self, record: Record) -> bool {
        echo(&record);
        let store = self.store_for(record.level);
        match store.append(&record) {
            Ok(()) => true,
            Err(e) => {
                warn!(channel = %store.channel(), error = %e, "Dropped telemetry record");
                false
            }
        }
    }
}

/// Console side effect of a captured record
fn echo(record: &Record) {
    let logger = record.logger_name.as_str();
    let message = record.message.as_str();
    match record.level {
        LogLevel::Fatal => {
            tracing::error!(target: RECORD_TARGET, logger, fatal = true, "{}", message)
        }
        LogLevel::Error => tracing::error!(target: RECORD_TARGET, logger, "{}", message),
        LogLevel::Warn => tracing::warn!(target: RECORD_TARGET, logger, "{}", message),
        LogLevel::Info => tracing::info!(target: RECORD_TARGET, logger, "{}", message),
        LogLevel::Debug => tracing::debug!(target: RECORD_TARGET, logger, "{}", message),
        LogLevel::Analytics => {
            tracing::trace!(target: RECORD_TARGET, logger, analytics = true, "{}", message)
        }
        LogLevel::None => {}
    }
}

/// A named logger, one per subsystem
#[derive(Debug)]
pub struct Logger {
    name: String,
    pipeline: Arc<Pipeline>,
}

impl Logger {
    pub(crate) fn new(name: impl Into<String>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            name: name.into(),
            pipeline,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capture a record at `level`; returns whether it was persisted
    pub fn record(&self, level: LogLevel, message: &str, metadata: Option<Metadata>) -> bool {
        self.pipeline.capture(level, &self.name, message, metadata)
    }

    pub fn debug(&self, message: &str) -> bool {
        self.record(LogLevel::Debug, message, None)
    }

    pub fn info(&self, message: &str) -> bool {
        self.record(LogLevel::Info, message, None)
    }

    pub fn warn(&self, message: &str) -> bool {
        self.record(LogLevel::Warn, message, None)
    }

    pub fn error(&self, message: &str) -> bool {
        self.record(LogLevel::Error, message, None)
    }

    pub fn fatal(&self, message: &str) -> bool {
        self.record(LogLevel::Fatal, message, None)
    }

    pub fn debug_with(&self, message: &str, metadata: Metadata) -> bool {
        self.record(LogLevel::Debug, message, Some(metadata))
    }

    pub fn info_with(&self, message: &str, metadata: Metadata) -> bool {
        self.record(LogLevel::Info, message, Some(metadata))
    }

    pub fn warn_with(&self, message: &str, metadata: Metadata) -> bool {
        self.record(LogLevel::Warn, message, Some(metadata))
    }

    pub fn error_with(&self, message: &str, metadata: Metadata) -> bool {
        self.record(LogLevel::Error, message, Some(metadata))
    }

    pub fn fatal_with(&self, message: &str, metadata: Metadata) -> bool {
        self.record(LogLevel::Fatal, message, Some(metadata))
    }

    /// Capture an analytics event on the analytics channel
    pub fn analytics(&self, event: &str, metadata: Option<Metadata>) -> bool {
        self.record(LogLevel::Analytics, event, metadata)
    }
}

/// Name → logger map owned by a telemetry context
#[derive(Debug, Default)]
pub struct LoggerRegistry {
    loggers: RwLock<HashMap<String, Arc<Logger>>>,
}

impl LoggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing logger for `name`, or the one built by `create`
    pub fn get_or_create(&self, name: &str, create: impl FnOnce() -> Logger) -> Arc<Logger> {
        if let Some(logger) = self.get(name) {
            return logger;
        }
        let mut loggers = self
            .loggers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Another thread may have won the race between the read and write lock
        Arc::clone(
            loggers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(create())),
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<Logger>> {
        self.loggers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.loggers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.loggers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
