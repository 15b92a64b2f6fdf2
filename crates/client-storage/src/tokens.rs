//! Typed access to the persisted credential set.

use crate::{KeyValueStore, KeyValueStoreExt, StorageKeys, StorageResult};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

/// Access token, optional refresh token and optional absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenData {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Expiry given as epoch milliseconds, the representation used on the wire.
    pub fn with_expires_at_millis(mut self, millis: i64) -> Self {
        self.expires_at = Utc.timestamp_millis_opt(millis).single();
        self
    }
}

/// Credential storage on top of a [`KeyValueStore`].
///
/// The three keys are written as one unit under a write lock; every read
/// takes the read lock, so no reader inside this process ever pairs a new
/// access token with a stale expiry. Reads degrade to "absent" on storage
/// failure, writes propagate the error.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
    lock: Arc<RwLock<()>>,
}

impl TokenStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Arc::new(RwLock::new(())),
        }
    }

    /// The underlying store, shared with other components (user data, device id).
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub async fn get_access_token(&self) -> Option<String> {
        let _guard = self.lock.read().await;
        self.read_string(StorageKeys::AUTH_TOKEN).await
    }

    pub async fn get_refresh_token(&self) -> Option<String> {
        let _guard = self.lock.read().await;
        self.read_string(StorageKeys::AUTH_TOKEN_REFRESH).await
    }

    pub async fn get_expires_at(&self) -> Option<DateTime<Utc>> {
        let _guard = self.lock.read().await;
        self.read_expiry().await
    }

    /// All three fields read under one lock; `None` without an access token.
    pub async fn snapshot(&self) -> Option<TokenData> {
        let _guard = self.lock.read().await;
        let access_token = self.read_string(StorageKeys::AUTH_TOKEN).await?;
        Some(TokenData {
            access_token,
            refresh_token: self.read_string(StorageKeys::AUTH_TOKEN_REFRESH).await,
            expires_at: self.read_expiry().await,
        })
    }

    /// Replace the whole credential set. Missing optional fields are removed
    /// so no value from an earlier set survives.
    pub async fn set_tokens(&self, tokens: &TokenData) -> StorageResult<()> {
        let _guard = self.lock.write().await;
        self.write_tokens(tokens).await.map_err(|e| {
            error!(error = %e, "Failed to store tokens");
            e
        })?;
        debug!(
            has_refresh_token = tokens.refresh_token.is_some(),
            has_expiry = tokens.expires_at.is_some(),
            "Tokens stored"
        );
        Ok(())
    }

    async fn write_tokens(&self, tokens: &TokenData) -> StorageResult<()> {
        self.store
            .set_item(StorageKeys::AUTH_TOKEN, tokens.access_token.as_str())
            .await?;

        match &tokens.refresh_token {
            Some(refresh) => {
                self.store
                    .set_item(StorageKeys::AUTH_TOKEN_REFRESH, refresh.as_str())
                    .await?
            }
            None => self.store.remove(StorageKeys::AUTH_TOKEN_REFRESH).await?,
        }

        match tokens.expires_at {
            Some(expires_at) => {
                self.store
                    .set_item(StorageKeys::AUTH_TOKEN_EXPIRES, &expires_at.timestamp_millis())
                    .await?
            }
            None => self.store.remove(StorageKeys::AUTH_TOKEN_EXPIRES).await?,
        }
        Ok(())
    }

    /// `false` when no expiry was ever recorded, else `now >= expires_at`.
    pub async fn is_token_expired(&self) -> bool {
        self.is_token_expired_at(Utc::now()).await
    }

    pub async fn is_token_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.get_expires_at().await {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Remove all three keys. Safe when none exist.
    pub async fn clear_tokens(&self) -> StorageResult<()> {
        let _guard = self.lock.write().await;
        let mut first_error = None;
        for key in StorageKeys::TOKEN_KEYS {
            if let Err(e) = self.store.remove(key).await {
                error!(key, error = %e, "Failed to clear token key");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                debug!("Tokens cleared");
                Ok(())
            }
        }
    }

    async fn read_string(&self, key: &str) -> Option<String> {
        match self.store.get_item::<String>(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read token, treating as absent");
                None
            }
        }
    }

    async fn read_expiry(&self) -> Option<DateTime<Utc>> {
        match self.store.get_item::<i64>(StorageKeys::AUTH_TOKEN_EXPIRES).await {
            Ok(millis) => millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            Err(e) => {
                warn!(error = %e, "Failed to read token expiry, assuming valid");
                None
            }
        }
    }
}
