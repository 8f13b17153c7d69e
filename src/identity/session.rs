use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::ClientCache;
use crate::error::{BridgeError, BridgeResult};
use crate::identity::RequestContext;

/// Verified caller identity. Lives for one login request and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub subject_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new<S: Into<String>>(subject_id: S, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { subject_id: subject_id.into(), expires_at }
    }

    pub fn has_subject(&self) -> bool { !self.subject_id.trim().is_empty() }
}

/// Resolves raw session tokens through the identity provider.
#[derive(Clone)]
pub struct SessionValidator {
    cache: Arc<ClientCache>,
}

impl SessionValidator {
    pub fn new(cache: Arc<ClientCache>) -> Self { Self { cache } }

    /// Resolve `raw_token` to a [`Session`].
    ///
    /// Any non-200 answer, transport fault or empty body is `SessionInvalid`;
    /// a response is never partially trusted. Failing to obtain the client
    /// surfaces the cache's own error unchanged.
    pub async fn resolve_session(&self, ctx: &RequestContext, raw_token: &str) -> BridgeResult<Session> {
        if raw_token.is_empty() {
            return Err(BridgeError::missing_field("session_token"));
        }
        let client = self.cache.identity_provider_client(ctx).await?;

        let lookup = ctx
            .run(client.to_session(raw_token))
            .await
            .map_err(|e| BridgeError::session_invalid("could not resolve session").with_source(e))?;
        if !lookup.is_success() {
            debug!(request_id = %ctx.request_id, status = lookup.status, "identity provider rejected session");
            return Err(BridgeError::session_invalid(format!("identity provider returned status {}", lookup.status)));
        }
        let Some(upstream) = lookup.session else {
            return Err(BridgeError::session_invalid("identity provider returned no session"));
        };
        if upstream.active == Some(false) {
            return Err(BridgeError::session_invalid("session is not active"));
        }

        let subject_id = upstream.identity.map(|i| i.id).unwrap_or_default();
        debug!(request_id = %ctx.request_id, subject = %subject_id, expires_at = ?upstream.expires_at, "session resolved");
        Ok(Session { subject_id, expires_at: upstream.expires_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigStore};
    use crate::error::ErrorKind;
    use crate::storage::MemoryStorage;
    use crate::upstream::{MemoryUpstreams, UpstreamSession};

    async fn validator() -> (SessionValidator, Arc<MemoryUpstreams>) {
        let up = MemoryUpstreams::new();
        let store = ConfigStore::new(Arc::new(MemoryStorage::new()));
        store.write(&Config::new("keto:4466", "http://kratos:4433", "kratos")).await.unwrap();
        let cache = Arc::new(ClientCache::new(store, up.connector()));
        (SessionValidator::new(cache), up)
    }

    #[tokio::test]
    async fn empty_token_makes_no_call() {
        let (v, up) = validator().await;
        let err = v.resolve_session(&RequestContext::new(), "").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert_eq!(up.identity_builds(), 0);
        assert_eq!(up.session_calls(), 0);
    }

    #[tokio::test]
    async fn resolves_subject_and_expiry() {
        let (v, up) = validator().await;
        let exp = Utc::now() + chrono::Duration::minutes(5);
        up.add_session("valid-tok", "user-1", Some(exp));
        let s = v.resolve_session(&RequestContext::new(), "valid-tok").await.unwrap();
        assert_eq!(s, Session::new("user-1", Some(exp)));
    }

    #[tokio::test]
    async fn rejected_and_unreachable_are_session_invalid() {
        let (v, up) = validator().await;
        let ctx = RequestContext::new();
        assert_eq!(v.resolve_session(&ctx, "unknown").await.unwrap_err().kind(), ErrorKind::SessionInvalid);

        up.add_session("tok", "user-1", None);
        up.set_identity_down(true);
        assert_eq!(v.resolve_session(&ctx, "tok").await.unwrap_err().kind(), ErrorKind::SessionInvalid);
    }

    #[tokio::test]
    async fn inactive_session_is_rejected_and_missing_identity_yields_empty_subject() {
        let (v, up) = validator().await;
        let ctx = RequestContext::new();
        up.add_raw_session("inactive", UpstreamSession { id: "s".into(), active: Some(false), ..Default::default() });
        up.add_raw_session("anon", UpstreamSession { id: "s2".into(), active: Some(true), ..Default::default() });

        assert_eq!(v.resolve_session(&ctx, "inactive").await.unwrap_err().kind(), ErrorKind::SessionInvalid);
        let anon = v.resolve_session(&ctx, "anon").await.unwrap();
        assert!(!anon.has_subject());
    }
}
