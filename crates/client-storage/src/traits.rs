//! Storage trait definitions.

use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Asynchronous string-keyed store persisted by the host platform.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a raw value
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store a raw value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Remove every value
    async fn clear(&self) -> StorageResult<()>;

    /// All keys currently stored
    async fn keys(&self) -> StorageResult<Vec<String>>;

    /// Check if a key exists
    async fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Typed access on top of [`KeyValueStore`]; values are JSON-encoded.
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_item<T>(&self, key: &str) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::Encoding(format!("{}: {}", key, e))),
            None => Ok(None),
        }
    }

    async fn set_item<T>(&self, key: &str, value: &T) -> StorageResult<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let raw = serde_json::to_string(value)
            .map_err(|e| StorageError::Encoding(format!("{}: {}", key, e)))?;
        self.set(key, &raw).await
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}
