use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use super::{CheckResponse, ConnectivityState, PermissionStoreClient, UpstreamClient, UpstreamError};
use crate::config::Config;
use crate::identity::AuthorizationTuple;

/// Permission-store client over its read API.
///
/// The handle tracks a connectivity state the way a channel would: `Idle` until
/// the first exchange, `Ready` after a successful one, `TransientFailure` after a
/// transport fault, `Shutdown` once closed.
#[derive(Debug)]
pub struct HttpPermissionStore {
    base: Url,
    client: reqwest::Client,
    state: AtomicU8,
    closed: AtomicBool,
}

/// `host[:port]` gets an `http://` scheme; a full URL is kept as given.
fn base_url(host: &str) -> Result<Url, UpstreamError> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return Err(UpstreamError::InvalidAddress(host.to_string()));
    }
    let raw = if host.contains("://") { format!("{host}/") } else { format!("http://{host}/") };
    Url::parse(&raw).map_err(|_| UpstreamError::InvalidAddress(host.to_string()))
}

impl HttpPermissionStore {
    pub fn new(config: &Config, timeout: Duration) -> Result<Self, UpstreamError> {
        let base = base_url(&config.permission_store_host)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        debug!(host = %base, "permission store client built");
        Ok(Self {
            base,
            client,
            state: AtomicU8::new(ConnectivityState::Idle.as_u8()),
            closed: AtomicBool::new(false),
        })
    }

    fn set_state(&self, s: ConnectivityState) {
        if !self.closed.load(Ordering::Acquire) {
            self.state.store(s.as_u8(), Ordering::Release);
        }
    }

    fn current_state(&self) -> ConnectivityState {
        if self.closed.load(Ordering::Acquire) {
            return ConnectivityState::Shutdown;
        }
        ConnectivityState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base.join(path).map_err(|_| UpstreamError::InvalidAddress(format!("{}{}", self.base, path)))
    }
}

#[async_trait]
impl UpstreamClient for HttpPermissionStore {
    fn name(&self) -> &'static str { "permission_store" }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.state.store(ConnectivityState::Shutdown.as_u8(), Ordering::Release);
        debug!(host = %self.base, "permission store client closed");
    }
}

#[async_trait]
impl PermissionStoreClient for HttpPermissionStore {
    async fn check(&self, tuple: &AuthorizationTuple) -> Result<CheckResponse, UpstreamError> {
        let url = self.endpoint("relation-tuples/check/openapi")?;
        let sent = self
            .client
            .get(url)
            .query(&[
                ("namespace", tuple.namespace.as_str()),
                ("object", tuple.object.as_str()),
                ("relation", tuple.relation.as_str()),
                ("subject_id", tuple.subject.as_str()),
            ])
            .send()
            .await;
        let resp = match sent {
            Ok(r) => r,
            Err(e) => {
                self.set_state(ConnectivityState::TransientFailure);
                return Err(e.into());
            }
        };
        self.set_state(ConnectivityState::Ready);
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(UpstreamError::Status(status));
        }
        resp.json::<CheckResponse>().await.map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    async fn connectivity_state(&self) -> ConnectivityState {
        if self.closed.load(Ordering::Acquire) {
            return ConnectivityState::Shutdown;
        }
        let Ok(url) = self.endpoint("health/ready") else { return ConnectivityState::TransientFailure; };
        let state = match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => ConnectivityState::Ready,
            Ok(_) | Err(_) => ConnectivityState::TransientFailure,
        };
        self.set_state(state);
        self.current_state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_gets_default_scheme() {
        assert_eq!(base_url("keto:4466").unwrap().as_str(), "http://keto:4466/");
        assert_eq!(base_url("https://keto.internal/").unwrap().as_str(), "https://keto.internal/");
        assert!(base_url("  ").is_err());
    }

    #[tokio::test]
    async fn starts_idle_and_closes_to_shutdown() {
        let store = HttpPermissionStore::new(&Config::new("keto:4466", "http://idp", "idp"), Duration::from_secs(1)).unwrap();
        assert_eq!(store.current_state(), ConnectivityState::Idle);
        store.close().await;
        assert_eq!(store.current_state(), ConnectivityState::Shutdown);
        assert_eq!(store.connectivity_state().await, ConnectivityState::Shutdown);
    }
}
