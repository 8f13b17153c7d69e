use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{Storage, StorageEntry};
use crate::error::{BridgeError, BridgeResult};

fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Directory-backed storage: key `config` lives in `<root>/config.json`.
#[derive(Clone, Debug)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> BridgeResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|e| {
            BridgeError::storage(format!("could not create storage folder {}", root.display())).with_source(e)
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path { &self.root }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_filename(key)))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> BridgeResult<Option<StorageEntry>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(value) => Ok(Some(StorageEntry { key: key.to_string(), value })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BridgeError::storage(format!("could not read {}", path.display())).with_source(e)),
        }
    }

    async fn put(&self, entry: StorageEntry) -> BridgeResult<()> {
        let path = self.path_for(&entry.key);
        let tmp = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &entry.value)
            .await
            .map_err(|e| BridgeError::storage(format!("could not write {}", tmp.display())).with_source(e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(BridgeError::storage(format!("could not replace {}", path.display())).with_source(e));
        }
        debug!(key = %entry.key, path = %path.display(), "storage.put");
        Ok(())
    }

    async fn delete(&self, key: &str) -> BridgeResult<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BridgeError::storage(format!("could not delete {}", path.display())).with_source(e)),
        }
    }
}
