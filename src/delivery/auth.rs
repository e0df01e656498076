//! Authorization for collector requests
//!
//! The refresh flow itself lives outside this crate. The coordinator only
//! needs "give me the credential you have" and "go get a fresh one".

use super::BoxFuture;
use crate::error::{Result, TelemetryError};

/// Bearer credential attached to uploads
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub access_token: String,
}

impl AuthToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
        }
    }
}

// Keep tokens out of debug output and logs
impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Source of credentials for the collector
pub trait Authorizer: Send + Sync {
    /// Credential to use for the first attempt, if one is already known
    fn current(&self) -> Option<AuthToken>;

    /// Obtain fresh authorization after the collector rejected a credential
    fn authorize(&self) -> BoxFuture<'_, Result<AuthToken>>;
}

/// Fixed API token, e.g. from `api_token` in the config
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: AuthToken,
}

impl StaticToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            token: AuthToken::new(access_token),
        }
    }
}

impl Authorizer for StaticToken {
    fn current(&self) -> Option<AuthToken> {
        Some(self.token.clone())
    }

    fn authorize(&self) -> BoxFuture<'_, Result<AuthToken>> {
        Box::pin(async move { Ok(self.token.clone()) })
    }
}

/// No credentials at all; any challenge fails the send
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthorization;

impl Authorizer for NoAuthorization {
    fn current(&self) -> Option<AuthToken> {
        None
    }

    fn authorize(&self) -> BoxFuture<'_, Result<AuthToken>> {
        Box::pin(async {
            Err(TelemetryError::AuthorizationRequired(
                "collector requires credentials but none are configured".to_string(),
            ))
        })
    }
}
