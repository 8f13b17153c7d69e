//! Caller identity and authorization checks.
//! The request scope travels through every step; the validator and checker
//! obtain their upstream handles from the shared client cache.

mod authorizer;
mod request_context;
mod session;

pub use authorizer::{AuthorizationTuple, RelationChecker};
pub use request_context::RequestContext;
pub use session::{Session, SessionValidator};
