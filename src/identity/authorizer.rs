use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::ClientCache;
use crate::error::{BridgeError, BridgeResult};
use crate::identity::RequestContext;

/// Relation tuple queried against the permission store. All four parts are required.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizationTuple {
    pub namespace: String,
    pub object: String,
    pub relation: String,
    pub subject: String,
}

impl AuthorizationTuple {
    pub fn new<S: Into<String>>(namespace: S, object: S, relation: S, subject: S) -> Self {
        Self { namespace: namespace.into(), object: object.into(), relation: relation.into(), subject: subject.into() }
    }

    pub fn validate(&self) -> BridgeResult<()> {
        for (name, value) in [
            ("namespace", &self.namespace),
            ("object", &self.object),
            ("relation", &self.relation),
            ("subject", &self.subject),
        ] {
            if value.is_empty() {
                return Err(BridgeError::missing_field(name));
            }
        }
        Ok(())
    }
}

/// Tests relation tuples through the permission store.
#[derive(Clone)]
pub struct RelationChecker {
    cache: Arc<ClientCache>,
}

impl RelationChecker {
    pub fn new(cache: Arc<ClientCache>) -> Self { Self { cache } }

    /// Returns the upstream `allowed` flag. A negative answer is `Ok(false)`;
    /// only a failed call is an error.
    pub async fn check_relation(&self, ctx: &RequestContext, tuple: &AuthorizationTuple) -> BridgeResult<bool> {
        tuple.validate()?;
        let client = self.cache.permission_store_client(ctx).await?;
        let resp = ctx
            .run(client.check(tuple))
            .await
            .map_err(|e| BridgeError::authorization_check_failed("relation check failed").with_source(e))?;
        debug!(
            request_id = %ctx.request_id,
            namespace = %tuple.namespace,
            relation = %tuple.relation,
            subject = %tuple.subject,
            allowed = resp.allowed,
            "relation checked"
        );
        Ok(resp.allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConfigStore};
    use crate::error::ErrorKind;
    use crate::storage::MemoryStorage;
    use crate::upstream::MemoryUpstreams;

    async fn checker() -> (RelationChecker, Arc<MemoryUpstreams>) {
        let up = MemoryUpstreams::new();
        let store = ConfigStore::new(Arc::new(MemoryStorage::new()));
        store.write(&Config::new("keto:4466", "http://kratos:4433", "kratos")).await.unwrap();
        (RelationChecker::new(Arc::new(ClientCache::new(store, up.connector()))), up)
    }

    #[tokio::test]
    async fn empty_part_is_rejected_before_any_call() {
        let (c, up) = checker().await;
        let ctx = RequestContext::new();
        let base = AuthorizationTuple::new("secret", "doc1", "viewer", "user-1");
        for (field, tuple) in [
            ("namespace", AuthorizationTuple { namespace: String::new(), ..base.clone() }),
            ("object", AuthorizationTuple { object: String::new(), ..base.clone() }),
            ("relation", AuthorizationTuple { relation: String::new(), ..base.clone() }),
            ("subject", AuthorizationTuple { subject: String::new(), ..base.clone() }),
        ] {
            let err = c.check_relation(&ctx, &tuple).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MissingField);
            assert_eq!(err.message(), format!("{field} is required"));
        }
        assert_eq!(up.check_calls(), 0);
        assert_eq!(up.permission_builds(), 0);
    }

    #[tokio::test]
    async fn deny_is_not_an_error_but_outage_is() {
        let (c, up) = checker().await;
        let ctx = RequestContext::new();
        let tuple = AuthorizationTuple::new("secret", "doc1", "viewer", "user-1");
        assert!(!c.check_relation(&ctx, &tuple).await.unwrap());

        up.allow(tuple.clone());
        assert!(c.check_relation(&ctx, &tuple).await.unwrap());

        up.set_permission_down(true);
        let err = c.check_relation(&ctx, &tuple).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthorizationCheckFailed);
        assert_eq!(up.check_calls(), 3);
    }
}
