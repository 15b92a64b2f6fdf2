//! HTTP client for the CardKing API.
//!
//! This crate provides:
//! - **[`ApiClient`]**: bearer-authenticated requests with transparent,
//!   single-flight token refresh and replay of requests that failed meanwhile
//! - **[`Transport`]**: the wire seam, with a `reqwest` implementation
//! - **[`ApiError`]**: the one error shape callers ever see
//!
//! The client never depends on a concrete session implementation; it is
//! handed an [`AuthSession`] at construction.

mod client;
mod envelope;
pub mod error;
mod request;
mod session;
mod transport;

pub use client::{ApiClient, ClientOptions};
pub use envelope::ApiEnvelope;
pub use error::{codes, messages, ApiError};
pub use request::{HttpMethod, RequestBody, RequestDescriptor};
pub use session::AuthSession;
pub use transport::{HttpResponse, PreparedRequest, ReqwestTransport, Transport, TransportError};

#[cfg(test)]
mod tests;
