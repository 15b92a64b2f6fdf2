//! Client configuration.
//!
//! Values come from, in increasing precedence: the built-in preset for the
//! selected [`Environment`], `~/.cardking/config.json`, and a handful of
//! `CARDKING_*` environment variables.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default API base URL (overridable at compile time via `CARDKING_API_BASE_URL`).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("CARDKING_API_BASE_URL") {
    Some(url) => url,
    None => "https://test-giftcard8-api.gcard8.com",
};

/// Shared signing secret (overridable at compile time via `CARDKING_APP_KEY`).
pub const DEFAULT_APP_KEY: &str = match option_env!("CARDKING_APP_KEY") {
    Some(key) => key,
    None => "development-app-key",
};

pub const DEFAULT_APP_ID: &str = "android-cardking-v1";
pub const DEFAULT_APP_VERSION: &str = "1.0.0";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_TOKEN_CHECK_INTERVAL_SECS: u64 = 5 * 60;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

impl FromStr for Environment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(CoreError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Relative paths of the authentication endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub login: String,
    pub register: String,
    pub refresh: String,
    pub logout: String,
    pub profile: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            register: "/auth/register".to_string(),
            refresh: "/auth/refresh".to_string(),
            logout: "/auth/logout".to_string(),
            profile: "/auth/profile".to_string(),
        }
    }
}

/// Main client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_app_id")]
    pub app_id: String,
    #[serde(default = "default_app_version")]
    pub app_version: String,
    #[serde(default = "default_app_key")]
    pub app_key: String,
    /// Transport timeout applied to every HTTP call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Upper bound on a single token refresh; `None` waits indefinitely.
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: Option<u64>,
    /// Interval of the background expiry check.
    #[serde(default = "default_token_check_interval_secs")]
    pub token_check_interval_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_true")]
    pub enable_logging: bool,
    #[serde(default)]
    pub log_stderr: bool,
    /// Case-insensitive markers in `msg`/`message`/`code` meaning the session expired.
    #[serde(default = "default_session_expired_markers")]
    pub session_expired_markers: Vec<String>,
    /// Treat every `success: false` envelope as an authentication failure.
    /// Turn off for backends that report business errors the same way.
    #[serde(default = "default_true")]
    pub unsuccessful_envelope_requires_auth: bool,
    #[serde(default)]
    pub endpoints: Endpoints,
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_app_id() -> String {
    DEFAULT_APP_ID.to_string()
}

fn default_app_version() -> String {
    DEFAULT_APP_VERSION.to_string()
}

fn default_app_key() -> String {
    DEFAULT_APP_KEY.to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_refresh_timeout_ms() -> Option<u64> {
    Some(DEFAULT_REFRESH_TIMEOUT_MS)
}

fn default_token_check_interval_secs() -> u64 {
    DEFAULT_TOKEN_CHECK_INTERVAL_SECS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_session_expired_markers() -> Vec<String> {
    vec!["session expired".to_string(), "token expired".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

impl Config {
    /// Built-in preset for an environment.
    pub fn for_environment(environment: Environment) -> Self {
        let (log_level, enable_logging) = match environment {
            Environment::Development => ("debug", true),
            Environment::Staging => (DEFAULT_LOG_LEVEL, true),
            Environment::Production => ("warn", false),
        };

        Self {
            environment,
            api_base_url: default_api_base_url(),
            app_id: default_app_id(),
            app_version: default_app_version(),
            app_key: default_app_key(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            refresh_timeout_ms: default_refresh_timeout_ms(),
            token_check_interval_secs: DEFAULT_TOKEN_CHECK_INTERVAL_SECS,
            log_level: log_level.to_string(),
            enable_logging,
            log_stderr: environment == Environment::Development,
            session_expired_markers: default_session_expired_markers(),
            unsuccessful_envelope_requires_auth: true,
            endpoints: Endpoints::default(),
        }
    }

    /// Preset selected by `CARDKING_ENV`, then environment overrides.
    pub fn new() -> CoreResult<Self> {
        let environment = match std::env::var("CARDKING_ENV") {
            Ok(name) => name.parse()?,
            Err(_) => Environment::default(),
        };
        let mut config = Self::for_environment(environment);
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load `config.json` if present (otherwise [`Config::new`]), then apply
    /// environment overrides and validate.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::new()?
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Apply `CARDKING_LOG_LEVEL` and `CARDKING_API_BASE_URL` from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(level) = non_empty("CARDKING_LOG_LEVEL") {
            self.log_level = level.trim().to_string();
        }
        if let Some(url) = non_empty("CARDKING_API_BASE_URL") {
            self.api_base_url = url.trim().to_string();
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.app_id.trim().is_empty() {
            return Err(CoreError::invalid("app_id", "must not be empty"));
        }
        if self.app_key.trim().is_empty() {
            return Err(CoreError::invalid("app_key", "must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(CoreError::invalid("request_timeout_ms", "must be greater than 0"));
        }
        if self.token_check_interval_secs == 0 {
            return Err(CoreError::invalid(
                "token_check_interval_secs",
                "must be greater than 0",
            ));
        }
        self.api_base_url()?;
        Ok(())
    }

    pub fn api_base_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_base_url).map_err(CoreError::from)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Option<Duration> {
        self.refresh_timeout_ms.map(Duration::from_millis)
    }

    pub fn token_check_interval(&self) -> Duration {
        Duration::from_secs(self.token_check_interval_secs)
    }
}
