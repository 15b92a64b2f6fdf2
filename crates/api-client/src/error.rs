//! The single error shape surfaced by the API client.

use crate::TransportError;
use request_signer::SignError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// User-facing fallback messages.
pub mod messages {
    pub const NETWORK_ERROR: &str = "Network error. Please check your connection.";
    pub const UNAUTHORIZED: &str = "You are not authorized to perform this action.";
    pub const VALIDATION_ERROR: &str = "Please check your input and try again.";
    pub const GENERIC_ERROR: &str = "Something went wrong. Please try again.";
    pub const REFRESH_FAILED: &str = "Token refresh failed";
    pub const REFRESH_TIMED_OUT: &str = "Token refresh timed out";
}

/// Machine-readable codes for failures produced on the client side.
pub mod codes {
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const SIGNING_FAILED: &str = "SIGNING_FAILED";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const REFRESH_FAILED: &str = "REFRESH_FAILED";
    pub const REFRESH_TIMEOUT: &str = "REFRESH_TIMEOUT";
    pub const REFRESH_ABORTED: &str = "REFRESH_ABORTED";
    pub const UNEXPECTED_FORMAT: &str = "UNEXPECTED_FORMAT";
}

/// Normalized failure. `status` is 0 when no HTTP response was received.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (status {status})")]
pub struct ApiError {
    pub message: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ApiError {
    pub fn new(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status,
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// No response was received.
    pub fn network() -> Self {
        Self::new(messages::NETWORK_ERROR, 0)
    }

    pub fn timeout() -> Self {
        Self::network().with_code(codes::TIMEOUT)
    }

    /// Build from an error response, preferring the server's own message.
    pub fn from_response(status: u16, body: &str) -> Self {
        let fallback = if status == 401 {
            messages::UNAUTHORIZED
        } else {
            messages::GENERIC_ERROR
        };

        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| text_field(v, "message").or_else(|| text_field(v, "msg")))
            .unwrap_or_else(|| fallback.to_string());
        let code = parsed.as_ref().and_then(code_field);

        Self {
            message,
            status,
            code,
        }
    }

    /// A `success: false` envelope.
    pub fn from_envelope(status: u16, code: Option<String>, msg: &str) -> Self {
        let message = if msg.trim().is_empty() {
            messages::GENERIC_ERROR.to_string()
        } else {
            msg.to_string()
        };
        Self {
            message,
            status,
            code,
        }
    }

    pub fn signing(error: &SignError) -> Self {
        Self::new(error.to_string(), 0).with_code(codes::SIGNING_FAILED)
    }

    /// Request body could not be encoded.
    pub fn invalid_body(error: &serde_json::Error) -> Self {
        Self::new(format!("{}: {}", messages::VALIDATION_ERROR, error), 0)
            .with_code(codes::INVALID_REQUEST)
    }

    /// Wrap the error reported by the refresh call. Every request that was
    /// waiting on that refresh receives a clone of the result.
    pub fn refresh_failed(cause: ApiError) -> Self {
        let message = if cause.message.trim().is_empty() {
            messages::REFRESH_FAILED.to_string()
        } else {
            cause.message
        };
        Self {
            message,
            status: cause.status,
            code: cause.code.or_else(|| Some(codes::REFRESH_FAILED.to_string())),
        }
    }

    pub fn refresh_timed_out(limit: Duration) -> Self {
        Self::new(
            format!("{} after {}ms", messages::REFRESH_TIMED_OUT, limit.as_millis()),
            0,
        )
        .with_code(codes::REFRESH_TIMEOUT)
    }

    /// The refresh ended without reporting an outcome.
    pub fn refresh_aborted() -> Self {
        Self::new(messages::REFRESH_FAILED, 0).with_code(codes::REFRESH_ABORTED)
    }

    pub fn unexpected_format(status: u16, detail: impl std::fmt::Display) -> Self {
        tracing::warn!(status, detail = %detail, "Unexpected response format");
        Self::new(messages::GENERIC_ERROR, status).with_code(codes::UNEXPECTED_FORMAT)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn is_network(&self) -> bool {
        self.status == 0 && self.code.as_deref() != Some(codes::SIGNING_FAILED)
    }
}

impl From<TransportError> for ApiError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout => Self::timeout(),
            _ => Self::network(),
        }
    }
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Servers send `code` either as a string or as a number.
pub(crate) fn code_field(value: &Value) -> Option<String> {
    match value.get("code")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
