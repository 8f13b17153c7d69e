//! identity-bridge: turns an identity-provider session into a time-bounded
//! credential, gated by a relation check against a permission store.

pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fields;
pub mod health;
pub mod identity;
pub mod lease;
pub mod login;
pub mod server;
pub mod storage;
pub mod upstream;
pub mod version;

pub use backend::Backend;
pub use error::{BridgeError, BridgeResult, ErrorKind};
