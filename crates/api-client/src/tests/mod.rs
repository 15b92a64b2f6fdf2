//! Protocol tests for the API client.
//!
//! - `harness.rs`        - Mock backend, mock session and client wiring
//! - `single_flight.rs`  - Concurrent unauthorized requests share one refresh
//! - `retry_guard.rs`    - Retried requests and the refresh call never loop
//! - `queue.rs`          - Queued requests replay with the new token, in order
//! - `refresh_failure.rs`- Failed or timed-out refresh rejects all and logs out
//! - `signing.rs`        - Signed bodies, re-signing on replay, signing failures
//! - `normalization.rs`  - Every failure surfaces as `ApiError`

mod normalization;
mod refresh_failure;
mod single_flight;
