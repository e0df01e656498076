//! Delivery coordinator
//!
//! Drives buffer swap → upload → cleanup for a channel. Each channel has its
//! own network context (an async mutex), so at most one upload per channel is
//! outstanding while the two channels proceed independently. File work runs on
//! the blocking pool inside the channel's I/O context and its errors are
//! carried back to the awaiting task.

pub mod auth;
pub mod transport;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, TelemetryError};
use crate::settings::Settings;
use crate::store::{Channel, ChannelStore};

pub use auth::{AuthToken, Authorizer, NoAuthorization, StaticToken};
pub use transport::{HttpTransport, Transport, TransportResponse, UploadRequest};

/// Boxed future returned by the transport and authorization seams
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How many times a rejected credential is refreshed during one send
pub const MAX_AUTHORIZATION_ATTEMPTS: u32 = 2;

/// Result of a send that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The collector accepted this many records and the buffer was removed
    Delivered { records: usize },
    /// The channel had nothing buffered
    NothingToSend,
}

/// Per-channel delivery state
struct Lane {
    store: Arc<ChannelStore>,
    /// Held for the whole prepare → upload → confirm sequence
    sending: Mutex<()>,
}

/// Ships buffered records to the collector
pub struct DeliveryCoordinator {
    logs: Lane,
    analytics: Lane,
    transport: Arc<dyn Transport>,
    authorizer: Arc<dyn Authorizer>,
    settings: Arc<Settings>,
}

impl DeliveryCoordinator {
    pub fn new(
        logs: Arc<ChannelStore>,
        analytics: Arc<ChannelStore>,
        transport: Arc<dyn Transport>,
        authorizer: Arc<dyn Authorizer>,
        settings: Arc<Settings>,
    ) -> Self {
        debug_assert_eq!(logs.channel(), Channel::Logs);
        debug_assert_eq!(analytics.channel(), Channel::Analytics);
        Self {
            logs: Lane {
                store: logs,
                sending: Mutex::new(()),
            },
            analytics: Lane {
                store: analytics,
                sending: Mutex::new(()),
            },
            transport,
            authorizer,
            settings,
        }
    }

    fn lane(&self, channel: Channel) -> &Lane {
        match channel {
            Channel::Logs => &self.logs,
            Channel::Analytics => &self.analytics,
        }
    }

    /// Upload everything buffered for a channel
    ///
    /// On failure the buffer file stays on disk and the next call resends it.
    pub async fn send(&self, channel: Channel) -> Result<SendOutcome> {
        let lane = self.lane(channel);
        let _sending = lane.sending.lock().await;

        let store = Arc::clone(&lane.store);
        let Some(content) = run_io(move || store.prepare_for_upload()).await? else {
            debug!(%channel, "Nothing to send");
            return Ok(SendOutcome::NothingToSend);
        };

        let payload = parse_batch(channel, &content);
        if payload.is_empty() {
            // Only unparseable lines were buffered; drop them rather than resend forever
            warn!(%channel, "Discarding buffer with no decodable records");
            self.confirm(lane).await;
            return Ok(SendOutcome::NothingToSend);
        }

        self.upload_authorized(channel, &payload).await?;
        self.confirm(lane).await;

        if channel == Channel::Logs && self.settings.fault_pending() {
            if let Err(e) = self.settings.set_fault_pending(false) {
                warn!(error = %e, "Failed to clear pending fault flag");
            }
        }

        info!(%channel, records = payload.len(), "Delivered telemetry batch");
        Ok(SendOutcome::Delivered {
            records: payload.len(),
        })
    }

    /// Remove the buffer after a successful upload
    ///
    /// A failed delete is not reported to the caller: the batch was delivered
    /// and will merely be sent again next cycle.
    async fn confirm(&self, lane: &Lane) {
        let store = Arc::clone(&lane.store);
        if let Err(e) = run_io(move || store.confirm_delivered()).await {
            warn!(channel = %lane.store.channel(), error = %e, "Delivered buffer not removed; it will be resent");
        }
    }

    /// POST the payload, refreshing authorization on challenges
    async fn upload_authorized(&self, channel: Channel, payload: &[Value]) -> Result<()> {
        let mut token = self.authorizer.current();
        let mut refreshes = 0;

        loop {
            let response = self
                .transport
                .upload(UploadRequest {
                    channel,
                    payload,
                    token: token.as_ref(),
                })
                .await?;

            if response.is_success() {
                return Ok(());
            }
            if !response.is_auth_challenge() {
                return Err(TelemetryError::TransportFailure {
                    status: Some(response.status),
                    reason: "collector rejected the batch".to_string(),
                });
            }
            if refreshes >= MAX_AUTHORIZATION_ATTEMPTS {
                return Err(TelemetryError::TransportFailure {
                    status: Some(response.status),
                    reason: format!(
                        "credentials still rejected after {refreshes} authorization attempts"
                    ),
                });
            }

            refreshes += 1;
            warn!(%channel, status = response.status, attempt = refreshes, "Collector challenged credentials, re-authorizing");
            token = Some(self.authorizer.authorize().await?);
        }
    }
}

/// Run a storage operation in the channel's I/O context and wait for it
async fn run_io<T, F>(op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| TelemetryError::StorageTask(e.to_string()))?
}

/// Decode newline-delimited records into the upload array
///
/// A torn final line from a crash mid-append is skipped.
fn parse_batch(channel: Channel, content: &str) -> Vec<Value> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<Value>(line) {
            Ok(value) if value.is_object() => Some(value),
            Ok(_) => {
                warn!(%channel, "Skipping buffered line that is not a JSON object");
                None
            }
            Err(e) => {
                warn!(%channel, error = %e, "Skipping undecodable buffered line");
                None
            }
        })
        .collect()
}
