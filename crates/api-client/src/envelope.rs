//! The `{ success, code, msg, data }` response envelope.

use crate::{ApiError, HttpResponse};
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_success() -> bool {
    true
}

fn code_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

/// Standard API response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, deserialize_with = "code_as_string")]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: String,
    /// Some endpoints report their text under `message` instead of `msg`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// `msg`, or `message` when `msg` is empty.
    pub fn text(&self) -> &str {
        if self.msg.is_empty() {
            self.message.as_deref().unwrap_or("")
        } else {
            &self.msg
        }
    }
}

impl<T: DeserializeOwned> ApiEnvelope<T> {
    pub fn from_response(response: &HttpResponse) -> Result<Self, ApiError> {
        response
            .json()
            .map_err(|e| ApiError::unexpected_format(response.status, e))
    }

    /// The payload of a successful envelope. A missing `data` is accepted
    /// for payload types that can be built from `null`, such as `()`.
    pub fn into_data(self, status: u16) -> Result<T, ApiError> {
        if !self.success {
            let message = self.text().to_string();
            return Err(ApiError::from_envelope(status, self.code, &message));
        }
        match self.data {
            Some(data) => Ok(data),
            None => serde_json::from_value(Value::Null)
                .map_err(|e| ApiError::unexpected_format(status, e)),
        }
    }
}
