//! In-process upstreams.
//!
//! `MemoryUpstreams` plays both the identity provider and the permission store
//! and is its own [`Connector`]. Every handle it builds records which
//! configuration it came from, and every call is counted, so tests can assert
//! how many handles were constructed and which one served a request.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use super::{
    CheckResponse, ConnectivityState, Connector, IdentityProviderClient, PermissionStoreClient, SessionLookup,
    UpstreamClient, UpstreamError, UpstreamIdentity, UpstreamSession,
};
use crate::config::Config;
use crate::identity::AuthorizationTuple;

#[derive(Default)]
pub struct MemoryUpstreams {
    sessions: RwLock<HashMap<String, UpstreamSession>>,
    tuples: RwLock<HashSet<AuthorizationTuple>>,

    identity_builds: AtomicUsize,
    permission_builds: AtomicUsize,
    identity_closes: AtomicUsize,
    permission_closes: AtomicUsize,
    session_calls: AtomicUsize,
    check_calls: AtomicUsize,

    /// Address of the handle that served each session/check call, in call order.
    served_by: Mutex<Vec<String>>,

    identity_down: AtomicBool,
    permission_down: AtomicBool,
    fail_connect: AtomicBool,
    connect_delay: Mutex<Duration>,
    call_delay: Mutex<Duration>,
}

impl MemoryUpstreams {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> { Arc::new(Arc::clone(self)) }

    /// Register a session token resolving to `subject`.
    pub fn add_session(&self, token: &str, subject: &str, expires_at: Option<DateTime<Utc>>) {
        let session = UpstreamSession {
            id: format!("session-{subject}"),
            active: Some(true),
            expires_at,
            identity: Some(UpstreamIdentity { id: subject.to_string() }),
        };
        self.sessions.write().insert(token.to_string(), session);
    }

    /// Register a raw session body, e.g. one without an identity.
    pub fn add_raw_session(&self, token: &str, session: UpstreamSession) {
        self.sessions.write().insert(token.to_string(), session);
    }

    pub fn allow(&self, tuple: AuthorizationTuple) {
        self.tuples.write().insert(tuple);
    }

    pub fn set_identity_down(&self, down: bool) { self.identity_down.store(down, Ordering::SeqCst); }
    pub fn set_permission_down(&self, down: bool) { self.permission_down.store(down, Ordering::SeqCst); }
    pub fn set_fail_connect(&self, fail: bool) { self.fail_connect.store(fail, Ordering::SeqCst); }
    pub fn set_connect_delay(&self, d: Duration) { *self.connect_delay.lock() = d; }
    pub fn set_call_delay(&self, d: Duration) { *self.call_delay.lock() = d; }

    pub fn identity_builds(&self) -> usize { self.identity_builds.load(Ordering::SeqCst) }
    pub fn permission_builds(&self) -> usize { self.permission_builds.load(Ordering::SeqCst) }
    pub fn identity_closes(&self) -> usize { self.identity_closes.load(Ordering::SeqCst) }
    pub fn permission_closes(&self) -> usize { self.permission_closes.load(Ordering::SeqCst) }
    pub fn session_calls(&self) -> usize { self.session_calls.load(Ordering::SeqCst) }
    pub fn check_calls(&self) -> usize { self.check_calls.load(Ordering::SeqCst) }

    /// Total upstream request calls (session resolution plus relation checks).
    pub fn upstream_calls(&self) -> usize { self.session_calls() + self.check_calls() }

    pub fn served_by(&self) -> Vec<String> { self.served_by.lock().clone() }

    async fn pause(delay: &Mutex<Duration>) {
        let d = *delay.lock();
        if !d.is_zero() {
            tokio::time::sleep(d).await;
        }
    }
}

pub struct MemoryIdentityProvider {
    upstreams: Arc<MemoryUpstreams>,
    built_from: String,
    closed: AtomicBool,
}

#[async_trait]
impl UpstreamClient for MemoryIdentityProvider {
    fn name(&self) -> &'static str { "identity_provider" }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.upstreams.identity_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl IdentityProviderClient for MemoryIdentityProvider {
    async fn to_session(&self, token: &str) -> Result<SessionLookup, UpstreamError> {
        self.upstreams.session_calls.fetch_add(1, Ordering::SeqCst);
        self.upstreams.served_by.lock().push(self.built_from.clone());
        MemoryUpstreams::pause(&self.upstreams.call_delay).await;
        if self.upstreams.identity_down.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unavailable("identity provider is down".into()));
        }
        let session = self.upstreams.sessions.read().get(token).cloned();
        Ok(match session {
            Some(s) => SessionLookup { status: 200, session: Some(s) },
            None => SessionLookup { status: 401, session: None },
        })
    }

    async fn is_alive(&self) -> Result<u16, UpstreamError> {
        MemoryUpstreams::pause(&self.upstreams.call_delay).await;
        if self.upstreams.identity_down.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unavailable("identity provider is down".into()));
        }
        Ok(200)
    }
}

pub struct MemoryPermissionStore {
    upstreams: Arc<MemoryUpstreams>,
    built_from: String,
    closed: AtomicBool,
}

#[async_trait]
impl UpstreamClient for MemoryPermissionStore {
    fn name(&self) -> &'static str { "permission_store" }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.upstreams.permission_closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl PermissionStoreClient for MemoryPermissionStore {
    async fn check(&self, tuple: &AuthorizationTuple) -> Result<CheckResponse, UpstreamError> {
        self.upstreams.check_calls.fetch_add(1, Ordering::SeqCst);
        self.upstreams.served_by.lock().push(self.built_from.clone());
        MemoryUpstreams::pause(&self.upstreams.call_delay).await;
        if self.upstreams.permission_down.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unavailable("permission store is down".into()));
        }
        Ok(CheckResponse { allowed: self.upstreams.tuples.read().contains(tuple) })
    }

    async fn connectivity_state(&self) -> ConnectivityState {
        MemoryUpstreams::pause(&self.upstreams.call_delay).await;
        if self.closed.load(Ordering::SeqCst) {
            ConnectivityState::Shutdown
        } else if self.upstreams.permission_down.load(Ordering::SeqCst) {
            ConnectivityState::TransientFailure
        } else {
            ConnectivityState::Ready
        }
    }
}

#[async_trait]
impl Connector for Arc<MemoryUpstreams> {
    async fn connect_identity_provider(&self, config: &Config) -> Result<Arc<dyn IdentityProviderClient>, UpstreamError> {
        MemoryUpstreams::pause(&self.connect_delay).await;
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unavailable(format!("cannot reach {}", config.identity_provider_url)));
        }
        self.identity_builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryIdentityProvider {
            upstreams: Arc::clone(self),
            built_from: config.identity_provider_url.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn connect_permission_store(&self, config: &Config) -> Result<Arc<dyn PermissionStoreClient>, UpstreamError> {
        MemoryUpstreams::pause(&self.connect_delay).await;
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(UpstreamError::Unavailable(format!("cannot reach {}", config.permission_store_host)));
        }
        self.permission_builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryPermissionStore {
            upstreams: Arc::clone(self),
            built_from: config.permission_store_host.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}
