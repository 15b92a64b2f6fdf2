//! JSON-file backed store that survives process restarts.

use crate::{KeyValueStore, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// [`KeyValueStore`] persisted as a single JSON object on disk.
///
/// The file is read on first access and rewritten (temp file + rename) on
/// every mutation, so a crash never leaves a truncated file behind.
pub struct FileStore {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, String>>>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> StorageResult<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                warn!(path = %path.display(), error = %e, "Store file is corrupt");
                StorageError::Encoding(e.to_string())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn persist(&self, data: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content =
            serde_json::to_string_pretty(data).map_err(|e| StorageError::Encoding(e.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        debug!(path = %self.path.display(), entries = data.len(), "Store persisted");
        Ok(())
    }

    /// Apply `mutate` to the loaded map and persist the result.
    async fn update<F>(&self, mutate: F) -> StorageResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>) + Send,
    {
        let mut guard = self.cache.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }

        let mut next = guard.clone().unwrap_or_default();
        mutate(&mut next);
        // The cache only moves forward once the file write succeeded.
        self.persist(&next).await?;
        *guard = Some(next);
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut guard = self.cache.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        Ok(guard.as_ref().and_then(|data| data.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.update(move |data| {
            data.insert(key, value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.update(move |data| {
            data.remove(&key);
        })
        .await
    }

    async fn clear(&self) -> StorageResult<()> {
        self.update(|data| data.clear()).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut guard = self.cache.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        Ok(guard
            .as_ref()
            .map(|data| data.keys().cloned().collect())
            .unwrap_or_default())
    }
}
