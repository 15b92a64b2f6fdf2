use crate::ApiError;
use async_trait::async_trait;

/// The session owner the client calls back into when a token stops working.
///
/// Implementations talk to the transport directly; going through the
/// [`ApiClient`](crate::ApiClient) would re-enter its unauthorized handling.
#[async_trait]
pub trait AuthSession: Send + Sync {
    /// Obtain a new access token and store it in the token store.
    async fn refresh_token(&self) -> Result<(), ApiError>;

    /// Clear tokens and cached user data. Never fails.
    async fn logout(&self);
}
