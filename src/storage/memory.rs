use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Storage, StorageEntry};
use crate::error::BridgeResult;

/// Process-local storage. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    map: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> BridgeResult<Option<StorageEntry>> {
        let map = self.map.read();
        Ok(map.get(key).map(|v| StorageEntry { key: key.to_string(), value: v.clone() }))
    }

    async fn put(&self, entry: StorageEntry) -> BridgeResult<()> {
        self.map.write().insert(entry.key, entry.value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        self.map.write().remove(key);
        Ok(())
    }
}
