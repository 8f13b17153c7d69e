//! Lease policy: how long an issued credential lives and its hard ceiling.

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::error::{BridgeError, BridgeResult};
use crate::identity::Session;

/// Computed lease. `ttl` may be zero or negative when derived from a session
/// that has already expired; rejecting that is the orchestrator's call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub ttl: Duration,
    pub max_ttl: Duration,
}

impl Lease {
    pub fn ttl_seconds(&self) -> i64 { self.ttl.num_seconds() }
    pub fn max_ttl_seconds(&self) -> i64 { self.max_ttl.num_seconds() }
}

fn seconds(v: u64) -> Duration {
    i64::try_from(v).ok().and_then(Duration::try_seconds).unwrap_or(Duration::MAX)
}

pub fn compute_lease(config: &Config, session: &Session, now: DateTime<Utc>) -> BridgeResult<Lease> {
    let ttl = if config.use_session_expiry_ttl {
        let expires_at = session.expires_at.ok_or_else(BridgeError::session_has_no_expiry)?;
        expires_at.signed_duration_since(now)
    } else {
        seconds(config.ttl_seconds)
    };
    Ok(Lease { ttl, max_ttl: seconds(config.max_ttl_seconds) })
}
