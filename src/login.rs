//! Login orchestration.
//!
//! A login runs a fixed sequence and stops at the first failure:
//! extract fields, resolve the session, derive the subject, check the relation,
//! read the configuration, compute the lease, emit the decision. Nothing is
//! retried here and no step is revisited.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cache::ClientCache;
use crate::config::ConfigStore;
use crate::error::{BridgeError, BridgeResult, ErrorKind};
use crate::fields::{FieldData, FieldKind, FieldSchema};
use crate::identity::{AuthorizationTuple, RelationChecker, RequestContext, SessionValidator};
use crate::lease::compute_lease;

pub const DISPLAY_NAME: &str = "identity-bridge";

pub const LOGIN_FIELDS: &[FieldSchema] = &[
    FieldSchema {
        name: "session_token",
        kind: FieldKind::String,
        required: true,
        default: None,
        description: "Session token or cookie issued by the identity provider",
    },
    FieldSchema {
        name: "namespace",
        kind: FieldKind::String,
        required: true,
        default: None,
        description: "Permission-store namespace of the object",
    },
    FieldSchema {
        name: "object",
        kind: FieldKind::String,
        required: true,
        default: None,
        description: "Object the caller wants access to",
    },
    FieldSchema {
        name: "relation",
        kind: FieldKind::String,
        required: true,
        default: None,
        description: "Relation the subject must have to the object",
    },
];

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub session_token: String,
    pub namespace: String,
    pub object: String,
    pub relation: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("session_token", &"<redacted>")
            .field("namespace", &self.namespace)
            .field("object", &self.object)
            .field("relation", &self.relation)
            .finish()
    }
}

impl LoginRequest {
    pub fn new<S: Into<String>>(session_token: S, namespace: S, object: S, relation: S) -> Self {
        Self {
            session_token: session_token.into(),
            namespace: namespace.into(),
            object: object.into(),
            relation: relation.into(),
        }
    }

    /// Strict decode against [`LOGIN_FIELDS`]; the first missing or empty field wins.
    pub fn decode(raw: &Map<String, Value>) -> BridgeResult<Self> {
        let data = FieldData::decode(LOGIN_FIELDS, raw)?;
        data.check_required()?;
        Ok(Self {
            session_token: data.require_str("session_token")?,
            namespace: data.require_str("namespace")?,
            object: data.require_str("object")?,
            relation: data.require_str("relation")?,
        })
    }

    pub fn validate(&self) -> BridgeResult<()> {
        let fields = [
            ("session_token", &self.session_token),
            ("namespace", &self.namespace),
            ("object", &self.object),
            ("relation", &self.relation),
        ];
        for (name, value) in fields {
            if value.is_empty() {
                return Err(BridgeError::missing_field(name));
            }
        }
        Ok(())
    }
}

/// Outcome of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginDecision {
    pub allowed: bool,
    pub policy_name: String,
    pub metadata: BTreeMap<String, String>,
    pub ttl: Duration,
    pub max_ttl: Duration,
}

pub fn policy_name(namespace: &str, relation: &str) -> String {
    format!("{namespace}_{relation}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    pub metadata: BTreeMap<String, String>,
}

/// Credential parameters handed to the host. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub policies: Vec<String>,
    pub ttl: i64,
    pub max_ttl: i64,
    pub period: i64,
    pub renewable: bool,
    pub metadata: BTreeMap<String, String>,
    pub internal_data: BTreeMap<String, String>,
    pub alias: Alias,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub auth: AuthResponse,
}

impl LoginDecision {
    pub fn to_response(&self) -> LoginResponse {
        let ttl = self.ttl.num_seconds();
        LoginResponse {
            auth: AuthResponse {
                policies: vec![self.policy_name.clone()],
                ttl,
                max_ttl: self.max_ttl.num_seconds(),
                period: ttl,
                renewable: false,
                metadata: self.metadata.clone(),
                internal_data: self.metadata.clone(),
                alias: Alias { name: DISPLAY_NAME.to_string(), metadata: self.metadata.clone() },
                display_name: DISPLAY_NAME.to_string(),
            },
        }
    }
}

/// Re-tag a step failure. Missing configuration and collaborator faults keep
/// their own kind.
fn step_error(err: BridgeError, kind: ErrorKind, message: &str) -> BridgeError {
    match err.kind() {
        ErrorKind::ConfigUnavailable | ErrorKind::Storage | ErrorKind::Internal => err,
        k if k == kind => err,
        _ => err.rekind(kind, message),
    }
}

#[derive(Clone)]
pub struct LoginOrchestrator {
    validator: SessionValidator,
    checker: RelationChecker,
    config: ConfigStore,
}

impl LoginOrchestrator {
    pub fn new(cache: Arc<ClientCache>) -> Self {
        Self {
            validator: SessionValidator::new(Arc::clone(&cache)),
            checker: RelationChecker::new(Arc::clone(&cache)),
            config: cache.config_store().clone(),
        }
    }

    /// Decode a raw login body and run it.
    pub async fn login(&self, ctx: &RequestContext, raw: &Map<String, Value>) -> BridgeResult<LoginDecision> {
        let request = LoginRequest::decode(raw)?;
        self.login_request(ctx, &request).await
    }

    pub async fn login_request(&self, ctx: &RequestContext, request: &LoginRequest) -> BridgeResult<LoginDecision> {
        request.validate()?;
        debug!(request_id = %ctx.request_id, namespace = %request.namespace, relation = %request.relation, "login started");

        let session = self
            .validator
            .resolve_session(ctx, &request.session_token)
            .await
            .map_err(|e| {
                warn!(request_id = %ctx.request_id, error = %e, "session resolution failed");
                step_error(e, ErrorKind::AuthenticationFailed, "could not resolve session")
            })?;

        if !session.has_subject() {
            warn!(request_id = %ctx.request_id, "session resolved without a subject");
            return Err(BridgeError::authentication_failed("session has no subject"));
        }

        let tuple = AuthorizationTuple::new(
            request.namespace.as_str(),
            request.object.as_str(),
            request.relation.as_str(),
            session.subject_id.as_str(),
        );
        let allowed = self.checker.check_relation(ctx, &tuple).await.map_err(|e| {
            warn!(request_id = %ctx.request_id, error = %e, "relation check failed");
            step_error(e, ErrorKind::AuthorizationCheckFailed, "could not check relation")
        })?;
        if !allowed {
            info!(
                request_id = %ctx.request_id,
                namespace = %tuple.namespace,
                relation = %tuple.relation,
                subject = %tuple.subject,
                "login denied"
            );
            return Err(BridgeError::not_authorized());
        }

        let config = self.config.require().await?;
        let lease = compute_lease(&config, &session, Utc::now())?;
        if config.use_session_expiry_ttl && lease.ttl <= Duration::zero() {
            return Err(BridgeError::authentication_failed("session has already expired"));
        }

        let metadata = BTreeMap::from([
            ("namespace".to_string(), tuple.namespace.clone()),
            ("object".to_string(), tuple.object.clone()),
            ("relation".to_string(), tuple.relation.clone()),
            ("subject".to_string(), tuple.subject.clone()),
        ]);
        let decision = LoginDecision {
            allowed: true,
            policy_name: policy_name(&tuple.namespace, &tuple.relation),
            metadata,
            ttl: lease.ttl,
            max_ttl: lease.max_ttl,
        };
        info!(
            request_id = %ctx.request_id,
            policy = %decision.policy_name,
            subject = %tuple.subject,
            ttl_secs = lease.ttl_seconds(),
            "login granted"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn decode_reports_first_missing_field() {
        let err = LoginRequest::decode(&raw(json!({"session_token": "t", "namespace": "ns", "relation": "r"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert_eq!(err.message(), "object is required");

        let err = LoginRequest::decode(&raw(json!({"session_token": "", "namespace": "ns", "object": "o", "relation": "r"}))).unwrap_err();
        assert_eq!(err.message(), "session_token is required");
    }

    #[test]
    fn decode_rejects_non_string_fields() {
        let err = LoginRequest::decode(&raw(json!({"session_token": "t", "namespace": 4, "object": "o", "relation": "r"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidField);
    }

    #[test]
    fn validate_names_each_empty_field() {
        for (i, name) in ["session_token", "namespace", "object", "relation"].into_iter().enumerate() {
            let mut parts = ["t".to_string(), "ns".to_string(), "o".to_string(), "r".to_string()];
            parts[i].clear();
            let [t, ns, o, r] = parts;
            let err = LoginRequest::new(t, ns, o, r).validate().unwrap_err();
            assert_eq!(err.message(), format!("{name} is required"));
        }
    }

    #[test]
    fn debug_output_hides_token() {
        let req = LoginRequest::new("secret-cookie", "ns", "o", "r");
        assert!(!format!("{req:?}").contains("secret-cookie"));
    }

    #[test]
    fn response_shape() {
        let metadata = BTreeMap::from([("subject".to_string(), "user-1".to_string())]);
        let decision = LoginDecision {
            allowed: true,
            policy_name: policy_name("secret", "viewer"),
            metadata: metadata.clone(),
            ttl: Duration::seconds(60),
            max_ttl: Duration::seconds(120),
        };
        let resp = decision.to_response().auth;
        assert_eq!(resp.policies, vec!["secret_viewer".to_string()]);
        assert_eq!((resp.ttl, resp.max_ttl, resp.period), (60, 120, 60));
        assert!(!resp.renewable);
        assert_eq!(resp.internal_data, metadata);
        assert_eq!(resp.alias.name, "identity-bridge");
        assert_eq!(resp.display_name, "identity-bridge");
    }

    #[test]
    fn step_error_keeps_config_and_storage_kinds() {
        let e = step_error(BridgeError::config_unavailable(), ErrorKind::AuthenticationFailed, "x");
        assert_eq!(e.kind(), ErrorKind::ConfigUnavailable);
        let e = step_error(BridgeError::storage("disk"), ErrorKind::AuthorizationCheckFailed, "x");
        assert_eq!(e.kind(), ErrorKind::Storage);
        let e = step_error(BridgeError::session_invalid("401"), ErrorKind::AuthenticationFailed, "x");
        assert_eq!(e.kind(), ErrorKind::AuthenticationFailed);
    }
}
