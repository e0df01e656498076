//! Courier - client-side log and analytics capture with batched delivery
//!
//! Records are filtered, appended to per-channel files under a size quota, and
//! uploaded in batches with at-least-once semantics. Start with
//! [`Telemetry::init`].

pub mod config;
pub mod context;
pub mod delivery;
pub mod diagnostics;
pub mod error;
pub mod fault;
pub mod filter;
pub mod logger;
pub mod record;
pub mod settings;
pub mod store;

pub use config::Config;
pub use context::{Telemetry, TelemetryBuilder};
pub use delivery::SendOutcome;
pub use error::{Result, TelemetryError};
pub use fault::{FaultObserver, FaultReport};
pub use logger::Logger;
pub use record::{LogLevel, Metadata, Record};
pub use store::{Channel, ChannelStatus};
