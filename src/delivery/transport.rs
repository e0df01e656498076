//! Transport adapter
//!
//! Ships one batch (a JSON array of records) per request. Authorization
//! challenges are reported back as a status code; deciding whether to
//! re-authorize belongs to the coordinator.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::auth::AuthToken;
use super::BoxFuture;
use crate::config::Config;
use crate::error::{Result, TelemetryError};
use crate::store::Channel;

/// Header carrying a unique id per upload attempt
pub const REQUEST_ID_HEADER: &str = "X-Courier-Request-Id";

/// One upload attempt
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub channel: Channel,
    pub payload: &'a [Value],
    pub token: Option<&'a AuthToken>,
}

/// What the collector answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The collector rejected the credential
    pub fn is_auth_challenge(&self) -> bool {
        self.status == 401 || self.status == 403
    }
}

/// Performs the network POST for a batch
///
/// Connection-level failures are `Err`; any HTTP answer, including errors,
/// is `Ok` with its status.
pub trait Transport: Send + Sync {
    fn upload<'a>(&'a self, request: UploadRequest<'a>) -> BoxFuture<'a, Result<TransportResponse>>;
}

/// Collector client over HTTP
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    app_key: String,
}

impl HttpTransport {
    /// Build from config; fails fast when the collector route is not configured
    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config
            .collector_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                TelemetryError::ClientNotInitialized("collector_url is not configured".to_string())
            })?;
        let app_key = config
            .app_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                TelemetryError::ClientNotInitialized("app_key is not configured".to_string())
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| TelemetryError::TransportFailure {
                status: None,
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_key: app_key.to_string(),
        })
    }

    /// URL a channel's batches are posted to
    pub fn endpoint(&self, channel: Channel) -> String {
        format!("{}/v1/{}/{}", self.base_url, self.app_key, channel.as_str())
    }
}

impl Transport for HttpTransport {
    fn upload<'a>(&'a self, request: UploadRequest<'a>) -> BoxFuture<'a, Result<TransportResponse>> {
        Box::pin(async move {
            let url = self.endpoint(request.channel);
            let request_id = uuid::Uuid::new_v4().to_string();
            debug!(%url, %request_id, records = request.payload.len(), "Uploading batch");

            let mut builder = self
                .client
                .post(&url)
                .header(REQUEST_ID_HEADER, &request_id)
                .json(request.payload);
            if let Some(token) = request.token {
                builder = builder.bearer_auth(&token.access_token);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| TelemetryError::TransportFailure {
                    status: None,
                    reason: format!("request to {url} failed: {e}"),
                })?;

            Ok(TransportResponse {
                status: response.status().as_u16(),
            })
        })
    }
}
