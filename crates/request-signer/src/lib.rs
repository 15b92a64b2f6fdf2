//! Request signing for the CardKing API.
//!
//! Every signed request carries the caller's parameters, the app and device
//! identity fields, and a `sign` digest over the canonical (key-sorted)
//! serialization of all of them plus the shared app key.

mod device;
mod params;
mod signer;

pub use device::{
    wire_os_type, DeviceIdentityCache, DeviceIdentitySource, DeviceInfo, StaticIdentitySource,
    SystemIdentitySource,
};
pub use params::SignParams;
pub use signer::{canonical_string, digest, AppIdentity, RequestSigner, SIGN_FIELD};

use thiserror::Error;

/// Errors from building or signing request parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("Parameter '{key}' has unsupported {kind} value")]
    UnsupportedValue { key: String, kind: &'static str },
    #[error("Signed parameters must be an object, got {0}")]
    NotAnObject(&'static str),
    #[error("Failed to encode parameters: {0}")]
    Encoding(String),
    #[error("Device identity unavailable: {0}")]
    DeviceDetection(String),
}

/// Result type for signing operations.
pub type SignResult<T> = Result<T, SignError>;
