//! Storage key constants.

/// Keys of every entry the client persists.
pub struct StorageKeys;

impl StorageKeys {
    /// Bearer access token
    pub const AUTH_TOKEN: &'static str = "auth_token";

    /// Refresh token
    pub const AUTH_TOKEN_REFRESH: &'static str = "auth_token_refresh";

    /// Access token expiry (epoch milliseconds)
    pub const AUTH_TOKEN_EXPIRES: &'static str = "auth_token_expires";

    /// Cached user profile (JSON)
    pub const USER_DATA: &'static str = "user_data";

    /// Fallback device identifier
    pub const DEVICE_ID: &'static str = "device_id";

    /// The three keys written together by the token store.
    pub const TOKEN_KEYS: [&'static str; 3] = [
        Self::AUTH_TOKEN,
        Self::AUTH_TOKEN_REFRESH,
        Self::AUTH_TOKEN_EXPIRES,
    ];
}
