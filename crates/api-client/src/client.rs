//! Request pipeline with single-flight token refresh.
//!
//! Every request reads the access token fresh from the [`TokenStore`] and is
//! sent through the [`Transport`]. An unauthorized answer (HTTP 401 or a
//! session-expired marker in the body) sends the request down one of three
//! paths:
//!
//! ```text
//! unauthorized ─┬─ retried / refresh call ───────────────► logout, fail
//!               ├─ refresh in flight ──► queued ─────────► replayed or rejected on drain
//!               ├─ refresh finished since it was sent ─┬─► ok: replayed once
//!               │                                      └─► failed: that refresh's error
//!               └─ otherwise ──► refresh ─┬─ ok ─────────► drain queue, replay
//!                                         └─ failed ─────► logout, reject queue, fail
//! ```
//!
//! The check-and-set of `is_refreshing` happens under one lock acquisition
//! with no `.await` in between, so at most one refresh runs at a time.

use crate::{
    ApiEnvelope, ApiError, AuthSession, HttpResponse, PreparedRequest, RequestBody,
    RequestDescriptor, Transport,
};
use client_config_and_utils::Config;
use client_storage::TokenStore;
use parking_lot::Mutex;
use request_signer::{RequestSigner, SignParams};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Behavior knobs for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Upper bound for one refresh; `None` waits indefinitely.
    pub refresh_timeout: Option<Duration>,
    /// Case-insensitive substrings that mark a body as "session expired".
    pub session_expired_markers: Vec<String>,
    /// Treat `success: false` envelopes as unauthorized. Turn off for
    /// backends that report business errors the same way.
    pub unsuccessful_envelope_requires_auth: bool,
    /// Requests to this path are never answered with another refresh.
    pub refresh_path: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            refresh_timeout: Some(DEFAULT_REFRESH_TIMEOUT),
            session_expired_markers: vec!["session expired".into(), "token expired".into()],
            unsuccessful_envelope_requires_auth: true,
            refresh_path: DEFAULT_REFRESH_PATH.into(),
        }
    }
}

impl ClientOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            refresh_timeout: config.refresh_timeout(),
            session_expired_markers: config.session_expired_markers.clone(),
            unsuccessful_envelope_requires_auth: config.unsuccessful_envelope_requires_auth,
            refresh_path: config.endpoints.refresh.clone(),
        }
    }

    fn normalized(mut self) -> Self {
        self.session_expired_markers = self
            .session_expired_markers
            .into_iter()
            .map(|m| m.trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }
}

type Reply = Result<HttpResponse, ApiError>;

/// A request parked while a refresh is in flight. The sender is consumed
/// on drain, so each entry is settled exactly once.
struct FailedRequest {
    descriptor: RequestDescriptor,
    reply: oneshot::Sender<Reply>,
}

/// How the most recent refresh ended.
#[derive(Debug, Clone, Default)]
struct RefreshOutcome {
    /// Bumped whenever a refresh finishes, successful or not.
    epoch: u64,
    failure: Option<ApiError>,
}

#[derive(Default)]
struct RefreshState {
    is_refreshing: bool,
    queue: VecDeque<FailedRequest>,
    last: RefreshOutcome,
}

enum Classified {
    Success,
    Unauthorized,
    Failed(ApiError),
}

enum NextStep {
    Wait(oneshot::Receiver<Reply>),
    Replay,
    Reject(ApiError),
    Refresh,
}

struct Inner {
    transport: Arc<dyn Transport>,
    tokens: TokenStore,
    signer: RequestSigner,
    session: Arc<dyn AuthSession>,
    options: ClientOptions,
    state: Mutex<RefreshState>,
    /// Publishes every outcome to callers that joined a running refresh.
    settled: watch::Sender<RefreshOutcome>,
}

/// Resets the refresh state if the refresh task dies before settling it.
struct RefreshGuard {
    inner: Arc<Inner>,
    armed: bool,
}

impl RefreshGuard {
    fn finish(&mut self, failure: Option<ApiError>) -> VecDeque<FailedRequest> {
        self.armed = false;
        self.inner.settle(failure)
    }
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Refresh ended without an outcome, logging out");
        let inner = Arc::clone(&self.inner);
        let err = ApiError::refresh_aborted();
        match tokio::runtime::Handle::try_current() {
            // Same teardown as a failed refresh. The state stays "refreshing"
            // until the logout is done.
            Ok(handle) => {
                handle.spawn(async move {
                    inner.force_logout().await;
                    reject_queue(inner.settle(Some(err.clone())), &err);
                });
            }
            Err(_) => reject_queue(inner.settle(Some(err.clone())), &err),
        }
    }
}

fn reject_queue(queue: VecDeque<FailedRequest>, err: &ApiError) {
    if !queue.is_empty() {
        warn!(queued = queue.len(), error = %err, "Rejecting queued requests");
    }
    for entry in queue {
        let _ = entry.reply.send(Err(err.clone()));
    }
}

impl Inner {
    async fn dispatch(self: &Arc<Self>, descriptor: RequestDescriptor) -> Reply {
        // Snapshot before the token is read, so a refresh that finishes while
        // this request is in flight is detected afterwards.
        let epoch = self.state.lock().last.epoch;
        let response = self.send(&descriptor).await?;
        match self.classify(&response) {
            Classified::Success => Ok(response),
            Classified::Failed(err) => Err(err),
            Classified::Unauthorized => self.recover(descriptor, epoch, &response).await,
        }
    }

    async fn recover(
        self: &Arc<Self>,
        descriptor: RequestDescriptor,
        epoch: u64,
        response: &HttpResponse,
    ) -> Reply {
        if descriptor.retried || self.is_refresh_call(&descriptor) {
            warn!(
                method = %descriptor.method,
                url = %descriptor.url,
                retried = descriptor.retried,
                "Unauthorized with no refresh left to try, logging out"
            );
            self.force_logout().await;
            return Err(unauthorized_error(response));
        }

        let next = {
            let mut state = self.state.lock();
            if state.is_refreshing {
                let (reply, wait) = oneshot::channel();
                state.queue.push_back(FailedRequest {
                    descriptor: descriptor.clone(),
                    reply,
                });
                NextStep::Wait(wait)
            } else if state.last.epoch != epoch {
                match &state.last.failure {
                    Some(err) => NextStep::Reject(err.clone()),
                    None => NextStep::Replay,
                }
            } else {
                state.is_refreshing = true;
                NextStep::Refresh
            }
        };

        match next {
            NextStep::Wait(wait) => {
                debug!(url = %descriptor.url, "Refresh in flight, request queued");
                wait.await.unwrap_or_else(|_| Err(ApiError::refresh_aborted()))
            }
            NextStep::Replay => {
                debug!(url = %descriptor.url, "Token refreshed meanwhile, replaying");
                self.replay(descriptor).await
            }
            NextStep::Reject(err) => {
                debug!(url = %descriptor.url, "Refresh failed meanwhile, rejecting");
                Err(err)
            }
            NextStep::Refresh => {
                self.run_refresh().await?;
                self.replay(descriptor).await
            }
        }
    }

    /// Send once more with whatever token is current. Unauthorized is final.
    async fn replay(&self, descriptor: RequestDescriptor) -> Reply {
        let descriptor = descriptor.mark_retried();
        let response = self.send(&descriptor).await?;
        match self.classify(&response) {
            Classified::Success => Ok(response),
            Classified::Failed(err) => Err(err),
            Classified::Unauthorized => {
                warn!(url = %descriptor.url, "Replayed request still unauthorized, logging out");
                self.force_logout().await;
                Err(unauthorized_error(&response))
            }
        }
    }

    /// The caller must have set `is_refreshing`. The refresh runs on its own
    /// task so that it settles the queue even if this caller goes away.
    async fn run_refresh(self: &Arc<Self>) -> Result<(), ApiError> {
        match tokio::spawn(Arc::clone(self).refresh_and_drain()).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Token refresh task ended abnormally");
                Err(ApiError::refresh_aborted())
            }
        }
    }

    async fn refresh_and_drain(self: Arc<Self>) -> Result<(), ApiError> {
        let mut guard = RefreshGuard {
            inner: Arc::clone(&self),
            armed: true,
        };

        info!("Access token rejected, refreshing");
        let outcome = match self.options.refresh_timeout {
            Some(limit) => tokio::time::timeout(limit, self.session.refresh_token())
                .await
                .unwrap_or_else(|_| Err(ApiError::refresh_timed_out(limit))),
            None => self.session.refresh_token().await,
        };

        match outcome {
            Ok(()) => {
                let queue = guard.finish(None);
                info!(queued = queue.len(), "Token refreshed, replaying queued requests");
                for entry in queue {
                    let inner = Arc::clone(&self);
                    tokio::spawn(async move {
                        let result = inner.replay(entry.descriptor).await;
                        if entry.reply.send(result).is_err() {
                            debug!("Caller stopped waiting for replayed request");
                        }
                    });
                }
                Ok(())
            }
            Err(cause) => {
                let err = ApiError::refresh_failed(cause);
                error!(error = %err, "Token refresh failed, logging out");
                self.force_logout().await;
                reject_queue(guard.finish(Some(err.clone())), &err);
                Err(err)
            }
        }
    }

    /// Leave the refreshing state, publish the outcome and take the queue.
    fn settle(&self, failure: Option<ApiError>) -> VecDeque<FailedRequest> {
        let mut state = self.state.lock();
        state.is_refreshing = false;
        state.last = RefreshOutcome {
            epoch: state.last.epoch + 1,
            failure,
        };
        self.settled.send_replace(state.last.clone());
        std::mem::take(&mut state.queue)
    }

    async fn force_logout(&self) {
        self.session.logout().await;
        if let Err(e) = self.tokens.clear_tokens().await {
            warn!(error = %e, "Failed to clear tokens after logout");
        }
    }

    async fn send(&self, descriptor: &RequestDescriptor) -> Reply {
        let token = self.tokens.get_access_token().await;

        let body = match &descriptor.body {
            RequestBody::Empty => None,
            RequestBody::Json(value) => Some(value.clone()),
            RequestBody::Signed(params) => Some(Value::Object(self.signer.prepare(params).await)),
        };

        let mut headers = descriptor.headers.clone();
        if body.is_some() && !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            headers.push(("Content-Type".into(), "application/json".into()));
        }
        if let Some(token) = token {
            headers.retain(|(k, _)| !k.eq_ignore_ascii_case("authorization"));
            headers.push(("Authorization".into(), format!("Bearer {}", token)));
        }

        debug!(
            method = %descriptor.method,
            url = %descriptor.url,
            retried = descriptor.retried,
            "API request"
        );

        let request = PreparedRequest {
            method: descriptor.method,
            url: descriptor.url.clone(),
            headers,
            body,
        };
        match self.transport.send(request).await {
            Ok(response) => {
                debug!(status = response.status, url = %descriptor.url, "API response");
                Ok(response)
            }
            Err(e) => {
                error!(url = %descriptor.url, error = %e, "API request failed");
                Err(ApiError::from(e))
            }
        }
    }

    fn classify(&self, response: &HttpResponse) -> Classified {
        if response.status == 401 {
            return Classified::Unauthorized;
        }

        let parsed: Option<Value> = serde_json::from_str(&response.body).ok();
        let expired = match &parsed {
            Some(body) => ["msg", "message", "code"].iter().any(|key| {
                body.get(key)
                    .and_then(Value::as_str)
                    .is_some_and(|text| self.is_expiry_marker(text))
            }),
            None => !response.is_success() && self.is_expiry_marker(&response.body),
        };
        if expired {
            return Classified::Unauthorized;
        }

        let unsuccessful = parsed
            .as_ref()
            .and_then(|body| body.get("success"))
            .and_then(Value::as_bool)
            == Some(false);
        if unsuccessful && self.options.unsuccessful_envelope_requires_auth {
            return Classified::Unauthorized;
        }

        if !response.is_success() {
            return Classified::Failed(ApiError::from_response(response.status, &response.body));
        }
        Classified::Success
    }

    fn is_expiry_marker(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.options
            .session_expired_markers
            .iter()
            .any(|marker| text.contains(marker.as_str()))
    }

    fn is_refresh_call(&self, descriptor: &RequestDescriptor) -> bool {
        let refresh = self.options.refresh_path.trim_end_matches('/');
        !refresh.is_empty() && descriptor.path().trim_end_matches('/').ends_with(refresh)
    }
}

/// Unauthorized answers are reported as 401 even when signalled in a 2xx body.
fn unauthorized_error(response: &HttpResponse) -> ApiError {
    let mut err = ApiError::from_response(response.status, &response.body);
    if response.is_success() {
        err.status = 401;
    }
    err
}

fn json_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body).map_err(|e| ApiError::invalid_body(&e))
}

fn signed_body<P: Serialize + ?Sized>(params: &P) -> Result<SignParams, ApiError> {
    SignParams::from_serializable(params).map_err(|e| {
        error!(error = %e, "Refusing to send request with unsignable parameters");
        ApiError::signing(&e)
    })
}

/// HTTP client for the CardKing API.
///
/// Cheap to clone; clones share the refresh state.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ApiClient")
            .field("is_refreshing", &state.is_refreshing)
            .field("queued", &state.queue.len())
            .field("epoch", &state.last.epoch)
            .finish()
    }
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: TokenStore,
        signer: RequestSigner,
        session: Arc<dyn AuthSession>,
        options: ClientOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                tokens,
                signer,
                session,
                options: options.normalized(),
                state: Mutex::new(RefreshState::default()),
                settled: watch::channel(RefreshOutcome::default()).0,
            }),
        }
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.inner.tokens
    }

    pub fn signer(&self) -> &RequestSigner {
        &self.inner.signer
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().is_refreshing
    }

    /// Requests currently parked behind a refresh.
    pub fn queued_requests(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Send a request through the full pipeline and return the raw response.
    pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<HttpResponse, ApiError> {
        self.inner.dispatch(descriptor).await
    }

    /// Send a request and unwrap the envelope's `data`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<T, ApiError> {
        let response = self.execute(descriptor).await?;
        ApiEnvelope::<T>::from_response(&response)?.into_data(response.status)
    }

    /// Send a request and return the whole envelope.
    pub async fn request_raw<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        let response = self.execute(descriptor).await?;
        ApiEnvelope::from_response(&response)
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.request(RequestDescriptor::get(url)).await
    }

    pub async fn post<T, B>(&self, url: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(RequestDescriptor::post(url).with_json(json_body(body)?))
            .await
    }

    pub async fn put<T, B>(&self, url: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(RequestDescriptor::put(url).with_json(json_body(body)?))
            .await
    }

    pub async fn patch<T, B>(&self, url: &str, body: &B) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(RequestDescriptor::patch(url).with_json(json_body(body)?))
            .await
    }

    pub async fn delete<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.request(RequestDescriptor::delete(url)).await
    }

    pub async fn get_raw<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        self.request_raw(RequestDescriptor::get(url)).await
    }

    pub async fn post_raw<T, B>(&self, url: &str, body: &B) -> Result<ApiEnvelope<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_raw(RequestDescriptor::post(url).with_json(json_body(body)?))
            .await
    }

    pub async fn put_raw<T, B>(&self, url: &str, body: &B) -> Result<ApiEnvelope<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_raw(RequestDescriptor::put(url).with_json(json_body(body)?))
            .await
    }

    pub async fn patch_raw<T, B>(&self, url: &str, body: &B) -> Result<ApiEnvelope<T>, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request_raw(RequestDescriptor::patch(url).with_json(json_body(body)?))
            .await
    }

    pub async fn delete_raw<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<ApiEnvelope<T>, ApiError> {
        self.request_raw(RequestDescriptor::delete(url)).await
    }

    /// POST a flat parameter object as a signed body.
    pub async fn post_signed<T, P>(&self, url: &str, params: &P) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.request(RequestDescriptor::post(url).with_signed(signed_body(params)?))
            .await
    }

    /// PUT a flat parameter object as a signed body.
    pub async fn put_signed<T, P>(&self, url: &str, params: &P) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        P: Serialize + ?Sized,
    {
        self.request(RequestDescriptor::put(url).with_signed(signed_body(params)?))
            .await
    }

    /// Refresh ahead of expiry through the same single-flight path.
    ///
    /// Returns `Ok(true)` when this call ran the refresh and `Ok(false)` when
    /// it joined one already running that succeeded. A failed refresh logs
    /// the session out like any other and its error is returned to every
    /// caller.
    pub async fn refresh_session(&self) -> Result<bool, ApiError> {
        let joined = {
            let mut state = self.inner.state.lock();
            if state.is_refreshing {
                Some(self.inner.settled.subscribe())
            } else {
                state.is_refreshing = true;
                None
            }
        };

        let Some(mut settled) = joined else {
            self.inner.run_refresh().await?;
            return Ok(true);
        };

        debug!("Joining refresh already in flight");
        if settled.changed().await.is_err() {
            return Err(ApiError::refresh_aborted());
        }
        let failure = settled.borrow().failure.clone();
        match failure {
            Some(err) => Err(err),
            None => Ok(false),
        }
    }
}
