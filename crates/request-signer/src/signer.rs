//! Canonical string and MD5 signature.

use crate::{DeviceIdentityCache, SignParams};
use client_config_and_utils::Config;
use md5::{Digest, Md5};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Name of the signature field in a signed envelope.
pub const SIGN_FIELD: &str = "sign";

/// App-level identity and the shared signing secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AppIdentity {
    pub app_id: String,
    pub app_version: String,
    pub app_key: String,
}

impl AppIdentity {
    pub fn new(
        app_id: impl Into<String>,
        app_version: impl Into<String>,
        app_key: impl Into<String>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_version: app_version.into(),
            app_key: app_key.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.app_id, &config.app_version, &config.app_key)
    }
}

impl fmt::Debug for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppIdentity")
            .field("app_id", &self.app_id)
            .field("app_version", &self.app_version)
            .field("app_key", &"[redacted]")
            .finish()
    }
}

/// `key=value` pairs in key order, joined by `&`.
pub fn canonical_string(params: &SignParams) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Lower-case hex MD5 of `canonical` followed by `app_key`.
pub fn digest(canonical: &str, app_key: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(canonical.as_bytes());
    hasher.update(app_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Signs request parameters with the app and device identity.
#[derive(Clone)]
pub struct RequestSigner {
    app: AppIdentity,
    device: Arc<DeviceIdentityCache>,
}

impl RequestSigner {
    pub fn new(app: AppIdentity, device: Arc<DeviceIdentityCache>) -> Self {
        Self { app, device }
    }

    pub fn app(&self) -> &AppIdentity {
        &self.app
    }

    /// Identity fields overlaid with the caller's params. A caller-supplied
    /// `sign` never takes part in its own digest.
    pub async fn signing_params(&self, params: &SignParams) -> SignParams {
        let device = self.device.get_device_info().await;
        let mut all = SignParams::new()
            .with("appid", &self.app.app_id)
            .with("version", &self.app.app_version)
            .with("os_type", &device.os_type)
            .with("device_no", &device.device_no)
            .with("device_type", &device.device_type);
        all.extend(params.iter().filter(|(k, _)| *k != SIGN_FIELD));
        all
    }

    /// Signature for `params`.
    pub async fn sign(&self, params: &SignParams) -> String {
        let all = self.signing_params(params).await;
        let canonical = canonical_string(&all);
        trace!(fields = all.len(), "Signing request parameters");
        digest(&canonical, &self.app.app_key)
    }

    /// Full signed envelope: identity fields, params and `sign`.
    pub async fn prepare(&self, params: &SignParams) -> Map<String, Value> {
        let all = self.signing_params(params).await;
        let signature = digest(&canonical_string(&all), &self.app.app_key);
        let mut envelope = all.to_json_object();
        envelope.insert(SIGN_FIELD.to_string(), Value::String(signature));
        envelope
    }
}
