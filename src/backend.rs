//! The surface the host calls: configuration management, login and health.
//!
//! Every configuration write or delete invalidates both cached clients once the
//! storage operation has completed, so a login that starts after the call
//! returns is served by a handle built from the new record.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::info;

use crate::cache::ClientCache;
use crate::config::{Config, ConfigStore};
use crate::error::BridgeResult;
use crate::health::{HealthProbe, HealthReport};
use crate::identity::RequestContext;
use crate::login::{LoginOrchestrator, LoginRequest, LoginResponse};
use crate::storage::Storage;
use crate::upstream::Connector;

pub struct Backend {
    config: ConfigStore,
    cache: Arc<ClientCache>,
    orchestrator: LoginOrchestrator,
    health: HealthProbe,
    request_timeout: Option<Duration>,
}

impl Backend {
    pub fn new(storage: Arc<dyn Storage>, connector: Arc<dyn Connector>) -> Self {
        let config = ConfigStore::new(storage);
        let cache = Arc::new(ClientCache::new(config.clone(), connector));
        Self {
            orchestrator: LoginOrchestrator::new(Arc::clone(&cache)),
            health: HealthProbe::new(Arc::clone(&cache)),
            config,
            cache,
            request_timeout: None,
        }
    }

    /// Deadline applied to every context from [`Backend::request_context`].
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn request_context(&self) -> RequestContext {
        let ctx = RequestContext::new();
        match self.request_timeout {
            Some(t) => ctx.with_timeout(t),
            None => ctx,
        }
    }

    pub fn cache(&self) -> &Arc<ClientCache> { &self.cache }

    pub async fn create_config(&self, raw: &Map<String, Value>) -> BridgeResult<Config> {
        let config = Config::decode_create(raw)?;
        self.store_config(&config).await?;
        Ok(config)
    }

    /// Merge the provided fields onto the stored record. With nothing stored this is a create.
    pub async fn update_config(&self, raw: &Map<String, Value>) -> BridgeResult<Config> {
        let existing = self.config.read().await?;
        let config = Config::decode_update(existing, raw)?;
        self.store_config(&config).await?;
        Ok(config)
    }

    async fn store_config(&self, config: &Config) -> BridgeResult<()> {
        self.config.write(config).await?;
        self.cache.invalidate_all().await;
        info!(
            permission_store_host = %config.permission_store_host,
            identity_provider_url = %config.identity_provider_url,
            "configuration stored"
        );
        Ok(())
    }

    pub async fn read_config(&self) -> BridgeResult<Config> {
        self.config.require().await
    }

    pub async fn delete_config(&self) -> BridgeResult<()> {
        self.config.delete().await?;
        self.cache.invalidate_all().await;
        info!("configuration deleted");
        Ok(())
    }

    pub async fn login(&self, ctx: &RequestContext, raw: &Map<String, Value>) -> BridgeResult<LoginResponse> {
        Ok(self.orchestrator.login(ctx, raw).await?.to_response())
    }

    pub async fn login_request(&self, ctx: &RequestContext, request: &LoginRequest) -> BridgeResult<LoginResponse> {
        Ok(self.orchestrator.login_request(ctx, request).await?.to_response())
    }

    pub async fn health(&self, ctx: &RequestContext) -> HealthReport {
        self.health.report(ctx).await
    }

    pub fn probe(&self) -> &HealthProbe { &self.health }
}
