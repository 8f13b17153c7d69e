//! Unified bridge error model and mapping helpers.
//! Every failure the login, config and health paths can produce carries an
//! [`ErrorKind`] so callers branch on the kind instead of matching messages.
//! The underlying cause, when there is one, stays reachable through `source()`.
//! Cancellation is not a kind of its own: it is a transport fault of whichever
//! step was running, and [`BridgeError::is_cancellation`] finds it in the chain.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingField,
    InvalidField,
    ConfigUnavailable,
    SessionInvalid,
    AuthenticationFailed,
    AuthorizationCheckFailed,
    NotAuthorized,
    SessionHasNoExpiry,
    HealthCheckFailed,
    ClientConstructionFailed,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn code_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingField => "missing_field",
            ErrorKind::InvalidField => "invalid_field",
            ErrorKind::ConfigUnavailable => "config_unavailable",
            ErrorKind::SessionInvalid => "session_invalid",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::AuthorizationCheckFailed => "authorization_check_failed",
            ErrorKind::NotAuthorized => "not_authorized",
            ErrorKind::SessionHasNoExpiry => "session_has_no_expiry",
            ErrorKind::HealthCheckFailed => "health_check_failed",
            ErrorKind::ClientConstructionFailed => "client_construction_failed",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::MissingField | ErrorKind::InvalidField => 400,
            ErrorKind::SessionInvalid | ErrorKind::AuthenticationFailed => 401,
            ErrorKind::NotAuthorized => 403,
            ErrorKind::SessionHasNoExpiry => 422,
            ErrorKind::AuthorizationCheckFailed | ErrorKind::ClientConstructionFailed => 502,
            ErrorKind::ConfigUnavailable | ErrorKind::HealthCheckFailed => 503,
            ErrorKind::Storage | ErrorKind::Internal => 500,
        }
    }

    /// Collaborator faults (storage, internal bugs) as opposed to login outcomes.
    pub fn is_internal(&self) -> bool {
        matches!(self, ErrorKind::Storage | ErrorKind::Internal)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct BridgeError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl BridgeError {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    /// Attach the underlying cause.
    pub fn with_source<E: Into<BoxError>>(mut self, source: E) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind { self.kind }
    pub fn message(&self) -> &str { &self.message }
    pub fn code_str(&self) -> &'static str { self.kind.code_str() }
    pub fn http_status(&self) -> u16 { self.kind.http_status() }

    /// Re-tag an error at a state-machine boundary, keeping the original as the cause.
    pub fn rekind<S: Into<String>>(self, kind: ErrorKind, message: S) -> Self {
        BridgeError::new(kind, message).with_source(self)
    }

    /// Message plus every cause in the chain, outermost first.
    pub fn chain_message(&self) -> String {
        let mut out = self.to_string();
        let mut cur = std::error::Error::source(self);
        while let Some(err) = cur {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cur = err.source();
        }
        out
    }

    /// True when a request cancellation or deadline sits anywhere in the cause chain.
    pub fn is_cancellation(&self) -> bool {
        let mut cur = std::error::Error::source(self);
        while let Some(err) = cur {
            if let Some(up) = err.downcast_ref::<crate::upstream::UpstreamError>() {
                if up.is_cancellation() { return true; }
            }
            cur = err.source();
        }
        false
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorKind::MissingField, format!("{field} is required"))
    }
    pub fn invalid_field<S: Into<String>>(field: &str, expected: S) -> Self {
        Self::new(ErrorKind::InvalidField, format!("{field} must be {}", expected.into()))
    }
    pub fn config_unavailable() -> Self {
        Self::new(ErrorKind::ConfigUnavailable, "bridge configuration has not been set")
    }
    pub fn session_invalid<S: Into<String>>(msg: S) -> Self { Self::new(ErrorKind::SessionInvalid, msg) }
    pub fn authentication_failed<S: Into<String>>(msg: S) -> Self { Self::new(ErrorKind::AuthenticationFailed, msg) }
    pub fn authorization_check_failed<S: Into<String>>(msg: S) -> Self { Self::new(ErrorKind::AuthorizationCheckFailed, msg) }
    pub fn not_authorized() -> Self {
        Self::new(ErrorKind::NotAuthorized, "subject does not have the relation to the object in the namespace")
    }
    pub fn session_has_no_expiry() -> Self {
        Self::new(ErrorKind::SessionHasNoExpiry, "session expiry ttl requested but the session carries no expiry")
    }
    pub fn health_check_failed<S: Into<String>>(msg: S) -> Self { Self::new(ErrorKind::HealthCheckFailed, msg) }
    pub fn client_construction_failed<S: Into<String>>(msg: S) -> Self { Self::new(ErrorKind::ClientConstructionFailed, msg) }
    pub fn storage<S: Into<String>>(msg: S) -> Self { Self::new(ErrorKind::Storage, msg) }
    pub fn internal<S: Into<String>>(msg: S) -> Self { Self::new(ErrorKind::Internal, msg) }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::internal("json encoding failed").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(BridgeError::missing_field("namespace").http_status(), 400);
        assert_eq!(BridgeError::invalid_field("ttl_seconds", "an integer").http_status(), 400);
        assert_eq!(BridgeError::authentication_failed("no").http_status(), 401);
        assert_eq!(BridgeError::not_authorized().http_status(), 403);
        assert_eq!(BridgeError::authorization_check_failed("down").http_status(), 502);
        assert_eq!(BridgeError::config_unavailable().http_status(), 503);
        assert_eq!(BridgeError::storage("disk").http_status(), 500);
    }

    #[test]
    fn missing_field_message_names_the_field() {
        let err = BridgeError::missing_field("relation");
        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert_eq!(err.message(), "relation is required");
        assert_eq!(err.to_string(), "missing_field: relation is required");
    }

    #[test]
    fn rekind_keeps_cause_chain() {
        let inner = BridgeError::session_invalid("upstream returned 401");
        let outer = inner.rekind(ErrorKind::AuthenticationFailed, "could not resolve session");
        assert_eq!(outer.kind(), ErrorKind::AuthenticationFailed);
        let src = std::error::Error::source(&outer).expect("cause");
        assert!(src.to_string().contains("upstream returned 401"));
        assert_eq!(
            outer.chain_message(),
            "authentication_failed: could not resolve session: session_invalid: upstream returned 401"
        );
    }

    #[test]
    fn internal_kinds_are_flagged() {
        assert!(ErrorKind::Storage.is_internal());
        assert!(!ErrorKind::NotAuthorized.is_internal());
    }
}
