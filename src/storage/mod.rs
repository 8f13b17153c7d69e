//!
//! identity-bridge storage module
//! ------------------------------
//! The bridge does not own persistence. The host hands it a key/value store and
//! the bridge keeps its single configuration record there under one key. This
//! module defines that collaborator's interface and two implementations:
//!
//! - [`MemoryStorage`]: process-local map, used by tests and when no data folder
//!   is configured.
//! - [`FileStorage`]: one JSON file per key under a root directory, written via a
//!   temp file and rename so readers never observe a half-written entry.
//!
//! Failures here are collaborator faults and surface as `ErrorKind::Storage`,
//! distinct from every login-specific error kind.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{BridgeError, BridgeResult};

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// A stored value addressed by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub key: String,
    pub value: Vec<u8>,
}

impl StorageEntry {
    pub fn json<T: Serialize>(key: &str, value: &T) -> BridgeResult<Self> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| BridgeError::storage(format!("could not encode storage entry {key}")).with_source(e))?;
        Ok(Self { key: key.to_string(), value: bytes })
    }

    pub fn decode_json<T: DeserializeOwned>(&self) -> BridgeResult<T> {
        serde_json::from_slice(&self.value)
            .map_err(|e| BridgeError::storage(format!("could not decode storage entry {}", self.key)).with_source(e))
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> BridgeResult<Option<StorageEntry>>;
    async fn put(&self, entry: StorageEntry) -> BridgeResult<()>;
    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> BridgeResult<()>;
}
