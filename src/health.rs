//! Upstream health probes.
//!
//! Probes obtain their clients through the cache, building one if needed, and
//! never write configuration or invalidate a handle.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::ClientCache;
use crate::error::{BridgeError, BridgeResult};
use crate::identity::RequestContext;

#[derive(Clone)]
pub struct HealthProbe {
    cache: Arc<ClientCache>,
}

impl HealthProbe {
    pub fn new(cache: Arc<ClientCache>) -> Self { Self { cache } }

    pub async fn check_identity_provider_health(&self, ctx: &RequestContext) -> BridgeResult<()> {
        let client = self.cache.identity_provider_client(ctx).await?;
        let status = ctx
            .run(client.is_alive())
            .await
            .map_err(|e| BridgeError::health_check_failed("identity provider liveness call failed").with_source(e))?;
        if status != 200 {
            return Err(BridgeError::health_check_failed(format!("identity provider is not alive: status {status}")));
        }
        debug!(request_id = %ctx.request_id, "identity provider is alive");
        Ok(())
    }

    pub async fn check_permission_store_health(&self, ctx: &RequestContext) -> BridgeResult<()> {
        let client = self.cache.permission_store_client(ctx).await?;
        let state = ctx
            .wait(client.connectivity_state())
            .await
            .map_err(|e| BridgeError::health_check_failed("permission store connectivity query failed").with_source(e))?;
        if !state.is_serving() {
            return Err(BridgeError::health_check_failed(format!("permission store connection is in state {state}")));
        }
        debug!(request_id = %ctx.request_id, %state, "permission store is ready");
        Ok(())
    }

    /// Run both probes and collect the outcome of each.
    pub async fn report(&self, ctx: &RequestContext) -> HealthReport {
        let (idp, ps) = tokio::join!(self.check_identity_provider_health(ctx), self.check_permission_store_health(ctx));
        HealthReport {
            identity_provider: UpstreamHealth::from_result(idp),
            permission_store: UpstreamHealth::from_result(ps),
            version: crate::version::running_version(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamHealth {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpstreamHealth {
    fn from_result(res: BridgeResult<()>) -> Self {
        match res {
            Ok(()) => Self { healthy: true, code: None, error: None },
            Err(e) => {
                warn!(error = %e.chain_message(), "health probe failed");
                Self { healthy: false, code: Some(e.code_str().to_string()), error: Some(e.message().to_string()) }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub identity_provider: UpstreamHealth,
    pub permission_store: UpstreamHealth,
    pub version: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.identity_provider.healthy && self.permission_store.healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigStore};
    use crate::error::ErrorKind;
    use crate::storage::MemoryStorage;
    use crate::upstream::MemoryUpstreams;

    async fn probe() -> (HealthProbe, Arc<MemoryUpstreams>) {
        let up = MemoryUpstreams::new();
        let store = ConfigStore::new(Arc::new(MemoryStorage::new()));
        store.write(&Config::new("keto:4466", "http://kratos:4433", "kratos")).await.unwrap();
        (HealthProbe::new(Arc::new(ClientCache::new(store, up.connector()))), up)
    }

    #[tokio::test]
    async fn probe_builds_client_when_first_consumer() {
        let (p, up) = probe().await;
        let ctx = RequestContext::new();
        p.check_identity_provider_health(&ctx).await.unwrap();
        p.check_permission_store_health(&ctx).await.unwrap();
        assert_eq!((up.identity_builds(), up.permission_builds()), (1, 1));
    }

    #[tokio::test]
    async fn unhealthy_upstreams_fail_without_invalidating() {
        let (p, up) = probe().await;
        let ctx = RequestContext::new();
        up.set_identity_down(true);
        up.set_permission_down(true);
        assert_eq!(p.check_identity_provider_health(&ctx).await.unwrap_err().kind(), ErrorKind::HealthCheckFailed);
        let err = p.check_permission_store_health(&ctx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HealthCheckFailed);
        assert!(err.message().contains("TRANSIENT_FAILURE"));

        let report = p.report(&ctx).await;
        assert!(!report.is_healthy());
        assert_eq!(report.permission_store.code.as_deref(), Some("health_check_failed"));
        assert_eq!((up.identity_closes(), up.permission_closes()), (0, 0));
        assert_eq!((up.identity_builds(), up.permission_builds()), (1, 1));
    }

    #[tokio::test]
    async fn slow_liveness_call_gives_up_at_the_deadline() {
        let (p, up) = probe().await;
        p.check_identity_provider_health(&RequestContext::new()).await.unwrap();
        up.set_call_delay(std::time::Duration::from_secs(5));

        let ctx = RequestContext::new().with_timeout(std::time::Duration::from_millis(30));
        let started = std::time::Instant::now();
        let err = p.check_identity_provider_health(&ctx).await.unwrap_err();
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert_eq!(err.kind(), ErrorKind::HealthCheckFailed);
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn cancelled_connectivity_query_fails_the_probe() {
        let (p, up) = probe().await;
        p.check_permission_store_health(&RequestContext::new()).await.unwrap();
        up.set_call_delay(std::time::Duration::from_secs(5));

        let token = tokio_util::sync::CancellationToken::new();
        let ctx = RequestContext::new().with_cancel(token.clone());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });
        let err = p.check_permission_store_health(&ctx).await.unwrap_err();
        canceller.await.unwrap();
        assert_eq!(err.kind(), ErrorKind::HealthCheckFailed);
        assert!(err.is_cancellation());
        assert_eq!(up.permission_closes(), 0);
    }
}
