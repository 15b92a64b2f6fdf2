//! Client runtime: one shared store, token store, signer, session and API
//! client, wired from a [`Config`].

use crate::{AuthResult, AuthState, HttpAuthSession, TokenRefreshMonitor};
use api_client::{ApiClient, ClientOptions, ReqwestTransport, Transport};
use chrono::{DateTime, Utc};
use client_config_and_utils::{Config, Paths};
use client_storage::{FileStore, KeyValueStore, TokenStore};
use request_signer::{
    AppIdentity, DeviceIdentityCache, DeviceIdentitySource, RequestSigner, SystemIdentitySource,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Snapshot of authentication state for status reporting.
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub authenticated: bool,
    pub user: Option<Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Shared client runtime.
#[derive(Clone)]
pub struct ClientRuntime {
    config: Arc<Config>,
    tokens: TokenStore,
    session: Arc<HttpAuthSession>,
    client: ApiClient,
}

impl ClientRuntime {
    /// Persist to the store file under `paths` and talk HTTP to the
    /// configured base URL.
    pub fn new(config: Config, paths: &Paths) -> AuthResult<Self> {
        config.validate()?;
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(paths.store_file()));
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::from_config(&config)?);
        Ok(Self::with_parts(
            config,
            store,
            transport,
            Arc::new(SystemIdentitySource::new()),
        ))
    }

    /// Wire the runtime from explicit parts.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
        identity: Arc<dyn DeviceIdentitySource>,
    ) -> Self {
        let tokens = TokenStore::new(store.clone());
        let device = Arc::new(DeviceIdentityCache::new(identity).with_store(store));
        let signer = RequestSigner::new(AppIdentity::from_config(&config), device);

        let session = Arc::new(HttpAuthSession::new(
            transport.clone(),
            signer.clone(),
            tokens.clone(),
            config.endpoints.clone(),
        ));
        let client = ApiClient::new(
            transport,
            tokens.clone(),
            signer,
            session.clone(),
            ClientOptions::from_config(&config),
        );

        info!(
            environment = %config.environment,
            base_url = %config.api_base_url,
            "Client runtime ready"
        );

        Self {
            config: Arc::new(config),
            tokens,
            session,
            client,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn session(&self) -> &Arc<HttpAuthSession> {
        &self.session
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Restore a persisted session, refreshing it if stale.
    ///
    /// The refresh goes through the client, so it is shared with any request
    /// that hits a 401 meanwhile.
    pub async fn initialize(&self) -> AuthResult<bool> {
        if self.session.persisted_user().await.is_none() {
            debug!("No persisted session found");
            return Ok(false);
        }

        if self.tokens.is_token_expired().await {
            info!("Stored token expired, refreshing before restoring the session");
            return match self.client.refresh_session().await {
                Ok(_) => Ok(true),
                Err(e) => {
                    warn!(error = %e, "Could not restore session");
                    Ok(false)
                }
            };
        }

        self.session.restore()
    }

    /// Start periodic expiry checks at the configured interval.
    pub fn start_refresh_monitor(&self) -> TokenRefreshMonitor {
        TokenRefreshMonitor::start(self.client.clone(), self.config.token_check_interval())
    }

    pub async fn snapshot(&self) -> AuthSnapshot {
        let state = self.session.state();
        AuthSnapshot {
            state,
            authenticated: state.is_authenticated(),
            user: self.session.current_user().await,
            expires_at: self.tokens.get_expires_at().await,
        }
    }
}
