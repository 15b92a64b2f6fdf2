//! Session ownership: login, registration, token refresh and logout.
//!
//! `HttpAuthSession` talks to the [`Transport`] directly. The API client
//! calls back into it when an access token stops working, so routing these
//! calls through the client would re-enter its unauthorized handling.

use crate::auth_fsm::{AuthMachine, AuthMachineInput, AuthState, AuthStateChangedPayload};
use crate::{AuthError, AuthResult};
use api_client::{
    ApiClient, ApiEnvelope, ApiError, AuthSession, HttpMethod, HttpResponse, PreparedRequest,
    Transport,
};
use async_trait::async_trait;
use client_config_and_utils::Endpoints;
use client_storage::{KeyValueStore, KeyValueStoreExt, StorageKeys, TokenData, TokenStore};
use parking_lot::Mutex;
use request_signer::{RequestSigner, SignParams};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// `data` of the login, register and refresh responses.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionPayload {
    #[serde(default)]
    user: Option<Value>,
    token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Count of finished refreshes and how the last one ended.
#[derive(Debug, Default)]
struct RefreshRecord {
    finished: u64,
    failure: Option<String>,
}

/// Callback type for auth state change notifications.
pub type AuthStateCallback = Box<dyn Fn(AuthStateChangedPayload) + Send + Sync>;

/// Owns the user's session and implements the refresh and logout hooks
/// the API client needs.
pub struct HttpAuthSession {
    transport: Arc<dyn Transport>,
    signer: RequestSigner,
    tokens: TokenStore,
    endpoints: Endpoints,
    fsm: Mutex<AuthMachine>,
    /// Id of the stored user, kept for state change payloads.
    user_id: Mutex<Option<String>>,
    state_callback: Mutex<Option<AuthStateCallback>>,
    /// Held for the whole of a refresh; later callers wait and share its outcome.
    refresh_lock: AsyncMutex<()>,
    last_refresh: Mutex<RefreshRecord>,
    /// Bumped by every logout. A response that started before the bump is
    /// never persisted.
    logouts: AsyncMutex<u64>,
}

impl HttpAuthSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        signer: RequestSigner,
        tokens: TokenStore,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            transport,
            signer,
            tokens,
            endpoints,
            fsm: Mutex::new(AuthMachine::new()),
            user_id: Mutex::new(None),
            state_callback: Mutex::new(None),
            refresh_lock: AsyncMutex::new(()),
            last_refresh: Mutex::new(RefreshRecord::default()),
            logouts: AsyncMutex::new(0),
        }
    }

    /// Set a callback to be notified of auth state changes.
    pub fn set_state_callback(&self, callback: AuthStateCallback) {
        *self.state_callback.lock() = Some(callback);
    }

    pub fn state(&self) -> AuthState {
        AuthState::from(self.fsm.lock().state())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// The stored user, if any. Read failures count as "no user".
    pub async fn current_user(&self) -> Option<Value> {
        match self.tokens.store().get_item::<Value>(StorageKeys::USER_DATA).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Failed to read stored user");
                None
            }
        }
    }

    /// Transition the FSM and notify the callback if the state changed.
    fn transition(&self, input: &AuthMachineInput) -> AuthResult<AuthState> {
        let mut fsm = self.fsm.lock();
        let old_state = AuthState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            AuthError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_state = AuthState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(old_state = ?old_state, new_state = ?new_state, "Auth state transition");
            self.notify_state_change(new_state);
        }

        Ok(new_state)
    }

    /// For teardown paths that must run whatever the current state.
    fn transition_or_log(&self, input: &AuthMachineInput) {
        if let Err(e) = self.transition(input) {
            debug!(error = %e, "Ignoring auth state transition");
        }
    }

    fn notify_state_change(&self, state: AuthState) {
        let callback = self.state_callback.lock();
        if let Some(callback) = callback.as_ref() {
            callback(AuthStateChangedPayload {
                state,
                user_id: self.user_id.lock().clone(),
            });
        }
    }

    /// Restore a persisted session.
    ///
    /// Returns `Ok(true)` when a session is active afterwards. A stale token
    /// is refreshed first; if that fails the session is cleared and
    /// `Ok(false)` is returned.
    pub async fn initialize(&self) -> AuthResult<bool> {
        if self.persisted_user().await.is_none() {
            debug!("No persisted session found");
            return Ok(false);
        }

        if self.tokens.is_token_expired().await {
            info!("Token expired during initialization, attempting refresh");
            return match self.refresh().await {
                Ok(()) => Ok(true),
                Err(e) => {
                    warn!(error = %e, "Failed to refresh token during initialization");
                    Ok(false)
                }
            };
        }

        self.restore()
    }

    /// The stored user, when both an access token and a user are stored.
    pub(crate) async fn persisted_user(&self) -> Option<Value> {
        self.tokens.get_access_token().await?;
        let user = self.current_user().await?;
        *self.user_id.lock() = user_id_of(&user);
        Some(user)
    }

    /// Mark a persisted, unexpired session as active.
    pub(crate) fn restore(&self) -> AuthResult<bool> {
        match self.state() {
            AuthState::LoggedOut => {
                self.transition(&AuthMachineInput::SessionRestored)?;
                info!(user_id = ?self.user_id.lock().as_deref(), "Session restored");
                Ok(true)
            }
            // A refresh or login already picked the session up.
            state => Ok(state != AuthState::LoggingOut),
        }
    }

    /// Log in with email and password. Returns the user.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<Value> {
        let params = SignParams::new()
            .with("email", email)
            .with("password", password);
        self.authenticate(self.endpoints.login.clone(), params, "User logged in")
            .await
    }

    /// Create an account and log into it. Returns the user.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> AuthResult<Value> {
        let params = SignParams::new()
            .with("name", name)
            .with("email", email)
            .with("password", password);
        self.authenticate(self.endpoints.register.clone(), params, "User registered")
            .await
    }

    async fn authenticate(
        &self,
        path: String,
        params: SignParams,
        success: &'static str,
    ) -> AuthResult<Value> {
        self.transition(&AuthMachineInput::LoginAttempt)?;
        let logouts = *self.logouts.lock().await;

        let body = Value::Object(self.signer.prepare(&params).await);
        let outcome = match self.post::<SessionPayload>(&path, body, None).await {
            Ok(payload) => self.store_session(payload, None, logouts).await,
            Err(AuthError::Api(e)) if e.is_unauthorized() => {
                Err(AuthError::InvalidCredentials(e.message))
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(user) => {
                self.transition(&AuthMachineInput::LoginSuccess)?;
                info!(user_id = ?self.user_id.lock().as_deref(), "{}", success);
                Ok(user.unwrap_or(Value::Null))
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Authentication failed");
                self.transition(&AuthMachineInput::LoginFailed)?;
                Err(e)
            }
        }
    }

    /// Exchange the refresh token for a new token set.
    ///
    /// On any failure tokens and user data are cleared and the session ends.
    /// A call made while another refresh is running waits for it and returns
    /// its outcome instead of refreshing again.
    pub async fn refresh(&self) -> AuthResult<()> {
        let seen = self.last_refresh.lock().finished;
        let _running = self.refresh_lock.lock().await;
        if let Some(outcome) = self.outcome_since(seen) {
            debug!("Refresh finished while waiting, sharing its outcome");
            return outcome;
        }

        let logouts = *self.logouts.lock().await;
        self.transition(&AuthMachineInput::TokenExpired)?;

        let result = match self.try_refresh(logouts).await {
            Ok(()) => {
                self.transition_or_log(&AuthMachineInput::RefreshSuccess);
                info!("Token refreshed successfully");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                self.clear_local().await;
                self.transition_or_log(&AuthMachineInput::RefreshFailed);
                Err(e)
            }
        };
        self.record_refresh(&result);
        result
    }

    fn outcome_since(&self, seen: u64) -> Option<AuthResult<()>> {
        let last = self.last_refresh.lock();
        (last.finished != seen).then(|| match &last.failure {
            None => Ok(()),
            Some(message) => Err(AuthError::TokenRefresh(message.clone())),
        })
    }

    fn record_refresh(&self, result: &AuthResult<()>) {
        let mut last = self.last_refresh.lock();
        last.finished += 1;
        last.failure = result.as_ref().err().map(|e| e.to_string());
    }

    async fn try_refresh(&self, logouts: u64) -> AuthResult<()> {
        let refresh_token = self
            .tokens
            .get_refresh_token()
            .await
            .ok_or(AuthError::NoRefreshToken)?;

        let body = json!({ "refreshToken": refresh_token });
        let payload: SessionPayload = self.post(&self.endpoints.refresh, body, None).await?;
        if payload.token.is_empty() {
            return Err(AuthError::TokenRefresh(
                "Server returned an empty access token".to_string(),
            ));
        }
        self.store_session(payload, Some(refresh_token), logouts)
            .await?;
        Ok(())
    }

    /// Best-effort server logout, then always clear local state.
    pub async fn logout(&self) {
        self.transition_or_log(&AuthMachineInput::LogoutRequested);
        *self.logouts.lock().await += 1;

        if let Some(token) = self.tokens.get_access_token().await {
            match self
                .post::<Value>(&self.endpoints.logout, json!({}), Some(&token))
                .await
            {
                Ok(_) => debug!("Server session closed"),
                Err(e) => warn!(error = %e, "Server logout failed, clearing local session anyway"),
            }
        }

        self.clear_local().await;
        self.transition_or_log(&AuthMachineInput::LogoutComplete);
        info!("User logged out");
    }

    /// Update the profile through the API client and store the result.
    pub async fn update_profile<P>(&self, api: &ApiClient, patch: &P) -> AuthResult<Value>
    where
        P: Serialize + ?Sized,
    {
        let user: Value = api.put(&self.endpoints.profile, patch).await?;
        self.tokens
            .store()
            .set_item(StorageKeys::USER_DATA, &user)
            .await?;
        *self.user_id.lock() = user_id_of(&user);
        info!("Profile updated");
        Ok(user)
    }

    /// Persist a token set and user. Returns the user from the payload.
    ///
    /// `logouts` is the logout count seen when the request started; if a
    /// logout happened since, nothing is written.
    async fn store_session(
        &self,
        payload: SessionPayload,
        previous_refresh_token: Option<String>,
        logouts: u64,
    ) -> AuthResult<Option<Value>> {
        let current = self.logouts.lock().await;
        if *current != logouts {
            warn!("Logged out while the request was in flight, discarding new session");
            return Err(AuthError::NotLoggedIn);
        }

        let mut tokens = TokenData::new(payload.token);
        if let Some(refresh_token) = payload.refresh_token.or(previous_refresh_token) {
            tokens = tokens.with_refresh_token(refresh_token);
        }
        if let Some(millis) = payload.expires_at {
            tokens = tokens.with_expires_at_millis(millis);
        }
        self.tokens.set_tokens(&tokens).await?;

        if let Some(user) = &payload.user {
            self.tokens
                .store()
                .set_item(StorageKeys::USER_DATA, user)
                .await?;
            *self.user_id.lock() = user_id_of(user);
        }
        Ok(payload.user)
    }

    async fn clear_local(&self) {
        if let Err(e) = self.tokens.clear_tokens().await {
            warn!(error = %e, "Failed to clear tokens");
        }
        if let Err(e) = self.tokens.store().remove(StorageKeys::USER_DATA).await {
            warn!(error = %e, "Failed to clear user data");
        }
        *self.user_id.lock() = None;
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
        bearer: Option<&str>,
    ) -> AuthResult<T> {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(token) = bearer {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        let request = PreparedRequest {
            method: HttpMethod::Post,
            url: path.to_string(),
            headers,
            body: Some(body),
        };

        debug!(url = %path, "Auth request");
        let response: HttpResponse = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(ApiError::from_response(response.status, &response.body).into());
        }
        let envelope = ApiEnvelope::<T>::from_response(&response)?;
        Ok(envelope.into_data(response.status)?)
    }
}

#[async_trait]
impl AuthSession for HttpAuthSession {
    async fn refresh_token(&self) -> Result<(), ApiError> {
        self.refresh().await.map_err(ApiError::from)
    }

    async fn logout(&self) {
        HttpAuthSession::logout(self).await
    }
}

/// Servers send the user id as a string or a number.
fn user_id_of(user: &Value) -> Option<String> {
    match user.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
