//! Upstream collaborator contracts.
//!
//! The bridge consumes two services it does not implement: an identity provider
//! that resolves session tokens and a permission store that answers relation
//! checks. Each is reached through a client handle built by a [`Connector`] from
//! the current [`Config`]. Handles must be safe for concurrent use once built.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::identity::AuthorizationTuple;

pub mod identity_provider;
pub mod memory;
pub mod permission_store;

pub use identity_provider::HttpIdentityProvider;
pub use memory::MemoryUpstreams;
pub use permission_store::HttpPermissionStore;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("invalid upstream address {0}")]
    InvalidAddress(String),
    #[error("invalid header {0}")]
    InvalidHeader(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("could not decode upstream response: {0}")]
    Decode(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl UpstreamError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, UpstreamError::Cancelled | UpstreamError::DeadlineExceeded)
    }
}

/// Connection state of a client handle, in the vocabulary of channel-based transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl ConnectivityState {
    /// States in which the handle can serve requests.
    pub fn is_serving(&self) -> bool {
        matches!(self, ConnectivityState::Ready | ConnectivityState::Idle)
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            ConnectivityState::Idle => 0,
            ConnectivityState::Connecting => 1,
            ConnectivityState::Ready => 2,
            ConnectivityState::TransientFailure => 3,
            ConnectivityState::Shutdown => 4,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectivityState::Idle,
            1 => ConnectivityState::Connecting,
            2 => ConnectivityState::Ready,
            3 => ConnectivityState::TransientFailure,
            _ => ConnectivityState::Shutdown,
        }
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectivityState::Idle => "IDLE",
            ConnectivityState::Connecting => "CONNECTING",
            ConnectivityState::Ready => "READY",
            ConnectivityState::TransientFailure => "TRANSIENT_FAILURE",
            ConnectivityState::Shutdown => "SHUTDOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamIdentity {
    pub id: String,
}

/// Session body as returned by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamSession {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub identity: Option<UpstreamIdentity>,
}

/// Outcome of a "resolve session by token" call that reached the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLookup {
    pub status: u16,
    pub session: Option<UpstreamSession>,
}

impl SessionLookup {
    pub fn is_success(&self) -> bool { self.status == 200 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Short name used in logs and health reports.
    fn name(&self) -> &'static str;

    /// Release the underlying connection. Calls already holding the handle may
    /// still complete.
    async fn close(&self);
}

#[async_trait]
pub trait IdentityProviderClient: UpstreamClient {
    async fn to_session(&self, token: &str) -> Result<SessionLookup, UpstreamError>;

    /// Liveness call; returns the HTTP-style status code.
    async fn is_alive(&self) -> Result<u16, UpstreamError>;
}

#[async_trait]
pub trait PermissionStoreClient: UpstreamClient {
    async fn check(&self, tuple: &AuthorizationTuple) -> Result<CheckResponse, UpstreamError>;

    async fn connectivity_state(&self) -> ConnectivityState;
}

/// Builds upstream handles from a configuration snapshot.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_identity_provider(&self, config: &Config) -> Result<Arc<dyn IdentityProviderClient>, UpstreamError>;
    async fn connect_permission_store(&self, config: &Config) -> Result<Arc<dyn PermissionStoreClient>, UpstreamError>;
}

/// Connector for the HTTP APIs of the identity provider and permission store.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    pub request_timeout: std::time::Duration,
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self { request_timeout: std::time::Duration::from_secs(10) }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    async fn connect_identity_provider(&self, config: &Config) -> Result<Arc<dyn IdentityProviderClient>, UpstreamError> {
        Ok(Arc::new(HttpIdentityProvider::new(config, self.request_timeout)?))
    }

    async fn connect_permission_store(&self, config: &Config) -> Result<Arc<dyn PermissionStoreClient>, UpstreamError> {
        Ok(Arc::new(HttpPermissionStore::new(config, self.request_timeout)?))
    }
}
