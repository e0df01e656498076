//! Error types for the telemetry pipeline
//!
//! Storage errors are recovered where they happen (the record is dropped and a
//! diagnostic is emitted). Transport errors travel back to whoever asked for the
//! send, with the buffer file left in place for the next attempt.

use std::path::PathBuf;

use crate::config::describe_io_error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Everything that can go wrong while capturing or delivering records
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A file operation on a channel's storage failed
    #[error("storage unavailable at {}: {}", .path.display(), describe_io_error(.source))]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record (or a buffered line) could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The collector could not be reached or rejected the batch
    #[error("transport failure{}: {reason}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    TransportFailure { status: Option<u16>, reason: String },

    /// The collector challenged the request and no authorization could be obtained
    #[error("authorization required: {0}")]
    AuthorizationRequired(String),

    /// Required client configuration is missing
    #[error("client not initialized: {0}")]
    ClientNotInitialized(String),

    /// A blocking storage task died before reporting back
    #[error("storage task failed: {0}")]
    StorageTask(String),

    /// The telemetry context was shut down
    #[error("telemetry context has been shut down")]
    ContextClosed,
}

impl TelemetryError {
    /// Wrap an I/O error with the path it happened on
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TelemetryError::StorageUnavailable {
            path: path.into(),
            source,
        }
    }

    /// Whether the buffer is kept and the send can be retried later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TelemetryError::TransportFailure { .. }
                | TelemetryError::AuthorizationRequired(_)
                | TelemetryError::StorageUnavailable { .. }
                | TelemetryError::StorageTask(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failure_display_with_status() {
        let err = TelemetryError::TransportFailure {
            status: Some(503),
            reason: "service unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "transport failure (HTTP 503): service unavailable"
        );
    }

    #[test]
    fn test_transport_failure_display_without_status() {
        let err = TelemetryError::TransportFailure {
            status: None,
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "transport failure: connection refused");
    }

    #[test]
    fn test_storage_error_mentions_path() {
        let err = TelemetryError::storage(
            "/tmp/courier/courier.log",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/courier/courier.log"));
        assert!(msg.contains("Permission denied"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(TelemetryError::AuthorizationRequired("token expired".into()).is_retryable());
        assert!(!TelemetryError::ClientNotInitialized("no app key".into()).is_retryable());
        assert!(!TelemetryError::ContextClosed.is_retryable());
    }
}
