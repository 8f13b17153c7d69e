//! Lazily built, shared upstream client handles.
//!
//! Each upstream kind has one [`ClientSlot`]. Readers take the shared lock and
//! clone the `Arc` out, so any number of logins use a handle at once and never
//! hold the lock across an upstream call. Construction and invalidation take
//! the exclusive lock; construction re-checks the slot under that lock, so two
//! first-time callers racing each other build exactly one handle.
//!
//! Invalidation closes the old client and empties the slot. Requests that
//! already cloned the old handle finish with it.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{Config, ConfigStore};
use crate::error::{BridgeError, BridgeResult};
use crate::identity::RequestContext;
use crate::upstream::{Connector, IdentityProviderClient, PermissionStoreClient, UpstreamClient, UpstreamError};

/// A client handle together with the configuration snapshot it was built from.
pub struct CachedClient<C: ?Sized> {
    pub client: Arc<C>,
    pub config: Config,
    pub built_at: DateTime<Utc>,
}

pub struct ClientSlot<C: ?Sized> {
    slot: RwLock<Option<Arc<CachedClient<C>>>>,
}

impl<C: ?Sized> Default for ClientSlot<C> {
    fn default() -> Self { Self { slot: RwLock::new(None) } }
}

impl<C: ?Sized + UpstreamClient> ClientSlot<C> {
    pub fn new() -> Self { Self::default() }

    /// Return the cached handle, building it with `init` if the slot is empty.
    ///
    /// Waiting for either lock is bounded by `ctx`: a caller whose deadline
    /// passes while another request is building gets `ClientConstructionFailed`.
    pub async fn get_or_try_init<F, Fut>(&self, ctx: &RequestContext, init: F) -> BridgeResult<Arc<CachedClient<C>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BridgeResult<(Arc<C>, Config)>>,
    {
        {
            let guard = ctx.wait(self.slot.read()).await.map_err(lock_wait_failed)?;
            if let Some(cached) = guard.as_ref() {
                return Ok(Arc::clone(cached));
            }
        }

        let mut guard = ctx.wait(self.slot.write()).await.map_err(lock_wait_failed)?;
        if let Some(cached) = guard.as_ref() {
            return Ok(Arc::clone(cached));
        }
        let (client, config) = init().await?;
        let cached = Arc::new(CachedClient { client, config, built_at: Utc::now() });
        *guard = Some(Arc::clone(&cached));
        Ok(cached)
    }

    /// Close and drop the cached handle. Returns whether one existed.
    pub async fn invalidate(&self) -> bool {
        let mut guard = self.slot.write().await;
        let Some(old) = guard.take() else { return false; };
        old.client.close().await;
        info!(client = old.client.name(), built_at = %old.built_at, "closed client");
        true
    }
}

fn lock_wait_failed(e: UpstreamError) -> BridgeError {
    BridgeError::client_construction_failed("gave up waiting for client construction").with_source(e)
}

/// Holder of the identity-provider and permission-store handles.
pub struct ClientCache {
    config: ConfigStore,
    connector: Arc<dyn Connector>,
    identity_provider: ClientSlot<dyn IdentityProviderClient>,
    permission_store: ClientSlot<dyn PermissionStoreClient>,
}

impl ClientCache {
    pub fn new(config: ConfigStore, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            identity_provider: ClientSlot::new(),
            permission_store: ClientSlot::new(),
        }
    }

    pub fn config_store(&self) -> &ConfigStore { &self.config }

    async fn snapshot(&self) -> BridgeResult<Config> {
        let config = self.config.require().await?;
        config.validate()?;
        Ok(config)
    }

    pub async fn identity_provider_handle(&self, ctx: &RequestContext) -> BridgeResult<Arc<CachedClient<dyn IdentityProviderClient>>> {
        self.identity_provider
            .get_or_try_init(ctx, move || async move {
                debug!(request_id = %ctx.request_id, "could not find existing identity provider client, creating new one");
                let config = self.snapshot().await?;
                let client = ctx
                    .run(self.connector.connect_identity_provider(&config))
                    .await
                    .map_err(|e| {
                        warn!(request_id = %ctx.request_id, url = %config.identity_provider_url, error = %e, "identity provider client construction failed");
                        BridgeError::client_construction_failed("could not create identity provider client").with_source(e)
                    })?;
                info!(client = client.name(), url = %config.identity_provider_url, "client created");
                Ok((client, config))
            })
            .await
    }

    pub async fn identity_provider_client(&self, ctx: &RequestContext) -> BridgeResult<Arc<dyn IdentityProviderClient>> {
        Ok(Arc::clone(&self.identity_provider_handle(ctx).await?.client))
    }

    pub async fn permission_store_handle(&self, ctx: &RequestContext) -> BridgeResult<Arc<CachedClient<dyn PermissionStoreClient>>> {
        self.permission_store
            .get_or_try_init(ctx, move || async move {
                debug!(request_id = %ctx.request_id, "could not find existing permission store client, creating new one");
                let config = self.snapshot().await?;
                let client = ctx
                    .run(self.connector.connect_permission_store(&config))
                    .await
                    .map_err(|e| {
                        warn!(request_id = %ctx.request_id, host = %config.permission_store_host, error = %e, "permission store client construction failed");
                        BridgeError::client_construction_failed("could not create permission store client").with_source(e)
                    })?;
                info!(client = client.name(), host = %config.permission_store_host, "client created");
                Ok((client, config))
            })
            .await
    }

    pub async fn permission_store_client(&self, ctx: &RequestContext) -> BridgeResult<Arc<dyn PermissionStoreClient>> {
        Ok(Arc::clone(&self.permission_store_handle(ctx).await?.client))
    }

    pub async fn invalidate_identity_provider_client(&self) -> bool {
        self.identity_provider.invalidate().await
    }

    pub async fn invalidate_permission_store_client(&self) -> bool {
        self.permission_store.invalidate().await
    }

    pub async fn invalidate_all(&self) {
        let idp = self.invalidate_identity_provider_client().await;
        let ps = self.invalidate_permission_store_client().await;
        debug!(identity_provider = idp, permission_store = ps, "invalidated cached clients");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::MemoryStorage;
    use crate::upstream::MemoryUpstreams;

    async fn cache_with_config() -> (ClientCache, Arc<MemoryUpstreams>) {
        let up = MemoryUpstreams::new();
        let store = ConfigStore::new(Arc::new(MemoryStorage::new()));
        store.write(&Config::new("keto:4466", "http://kratos:4433", "kratos")).await.unwrap();
        (ClientCache::new(store, up.connector()), up)
    }

    #[tokio::test]
    async fn second_call_reuses_handle() {
        let (cache, up) = cache_with_config().await;
        let ctx = RequestContext::new();
        let a = cache.identity_provider_handle(&ctx).await.unwrap();
        let b = cache.identity_provider_handle(&ctx).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(up.identity_builds(), 1);
        assert_eq!(a.config.identity_provider_url, "http://kratos:4433");
        assert!(a.built_at <= Utc::now());
    }

    #[tokio::test]
    async fn cancelled_caller_does_not_wait_for_the_slot() {
        let (cache, up) = cache_with_config().await;
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let ctx = RequestContext::new().with_cancel(token);
        let err = cache.identity_provider_handle(&ctx).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ClientConstructionFailed);
        assert!(err.is_cancellation());
        assert_eq!(up.identity_builds(), 0);
    }

    #[tokio::test]
    async fn missing_config_fails_fast_without_building() {
        let up = MemoryUpstreams::new();
        let cache = ClientCache::new(ConfigStore::new(Arc::new(MemoryStorage::new())), up.connector());
        let err = cache.permission_store_client(&RequestContext::new()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ConfigUnavailable);
        assert_eq!(up.permission_builds(), 0);
    }

    #[tokio::test]
    async fn connect_failure_leaves_slot_empty() {
        let (cache, up) = cache_with_config().await;
        up.set_fail_connect(true);
        let ctx = RequestContext::new();
        let err = cache.identity_provider_client(&ctx).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ClientConstructionFailed);

        up.set_fail_connect(false);
        assert!(cache.identity_provider_client(&ctx).await.is_ok());
        assert_eq!(up.identity_builds(), 1);
    }

    #[tokio::test]
    async fn invalidate_closes_then_rebuilds() {
        let (cache, up) = cache_with_config().await;
        let ctx = RequestContext::new();
        let _ = cache.permission_store_client(&ctx).await.unwrap();
        assert!(cache.invalidate_permission_store_client().await);
        assert_eq!(up.permission_closes(), 1);
        assert!(!cache.invalidate_permission_store_client().await);
        assert_eq!(up.permission_closes(), 1);

        let _ = cache.permission_store_client(&ctx).await.unwrap();
        assert_eq!(up.permission_builds(), 2);
    }
}
