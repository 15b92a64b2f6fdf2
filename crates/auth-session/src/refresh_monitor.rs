//! Periodic token expiry check.
//!
//! Refreshes ahead of the first 401 when the stored expiry has passed. The
//! refresh goes through [`ApiClient::refresh_session`], so it never races a
//! refresh started by a failing request, and a failure logs the user out
//! exactly like one.

use api_client::{ApiClient, ApiError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Result of one expiry check.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpiryCheck {
    /// No access token stored.
    NotLoggedIn,
    /// Token still valid, or no expiry was recorded.
    Fresh,
    Refreshed,
    /// Joined a refresh that was already running and succeeded.
    AlreadyRefreshing,
    /// The refresh failed and the session was ended.
    Failed(ApiError),
}

/// Check the stored expiry once and refresh if it has passed.
pub async fn check_token_expiry(client: &ApiClient) -> ExpiryCheck {
    if client.tokens().get_access_token().await.is_none() {
        return ExpiryCheck::NotLoggedIn;
    }
    if !client.tokens().is_token_expired().await {
        return ExpiryCheck::Fresh;
    }

    info!("Token expired, attempting refresh");
    match client.refresh_session().await {
        Ok(true) => ExpiryCheck::Refreshed,
        Ok(false) => ExpiryCheck::AlreadyRefreshing,
        Err(e) => {
            warn!(error = %e, "Scheduled token refresh failed");
            ExpiryCheck::Failed(e)
        }
    }
}

/// Background task running [`check_token_expiry`] on a fixed interval.
///
/// The first check runs immediately.
pub struct TokenRefreshMonitor {
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl TokenRefreshMonitor {
    pub fn start(client: ApiClient, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(client, interval, shutdown_rx));
        info!(interval_secs = interval.as_secs(), "Started token refresh monitor");
        Self { shutdown_tx, task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Token refresh monitor ended abnormally");
        }
    }
}

async fn run(client: ApiClient, interval: Duration, mut shutdown_rx: oneshot::Receiver<()>) {
    // A zero period would panic.
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                info!("Shutting down token refresh monitor");
                break;
            }
            _ = ticker.tick() => {
                let outcome = check_token_expiry(&client).await;
                debug!(outcome = ?outcome, "Token expiry check");
            }
        }
    }
}
