//! Authentication error types.

use api_client::{ApiError, TransportError};
use thiserror::Error;

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Server rejected the email/password pair
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Token refresh error
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// Refresh requested with nothing to refresh with
    #[error("No refresh token available")]
    NoRefreshToken,

    /// Session not found
    #[error("Not logged in")]
    NotLoggedIn,

    /// Invalid state transition in the auth FSM
    #[error("Invalid auth state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] client_storage::StorageError),

    /// The server answered with an error
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// No response was received
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors are transport failures, client-side network errors
    /// and 5xx answers.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Transport(_) => true,
            AuthError::Api(e) => e.is_network() || e.status >= 500,
            _ => false,
        }
    }
}

impl From<client_config_and_utils::CoreError> for AuthError {
    fn from(e: client_config_and_utils::CoreError) -> Self {
        AuthError::Config(e.to_string())
    }
}

/// Every auth failure handed to the API client becomes an `ApiError`.
impl From<AuthError> for ApiError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Api(e) => e,
            AuthError::Transport(e) => ApiError::from(e),
            AuthError::InvalidCredentials(message) => ApiError::new(message, 401),
            AuthError::NoRefreshToken | AuthError::NotLoggedIn => {
                ApiError::new(error.to_string(), 401)
            }
            AuthError::TokenRefresh(message) => ApiError::new(message, 0),
            other => ApiError::new(other.to_string(), 0),
        }
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
