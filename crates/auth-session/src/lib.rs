//! Authentication for the CardKing client.
//!
//! This crate provides:
//! - Login, registration, token refresh and logout against the auth endpoints
//! - The [`api_client::AuthSession`] implementation the API client calls back into
//! - Explicit FSM-based auth state management
//! - A background monitor that refreshes tokens ahead of expiry
//! - [`ClientRuntime`], which wires all of the above from a config

mod auth_fsm;
mod error;
mod refresh_monitor;
mod runtime;
mod session;

pub use auth_fsm::auth_machine;
pub use auth_fsm::{
    AuthMachine, AuthMachineInput, AuthMachineState, AuthState, AuthStateChangedPayload,
};
pub use error::{AuthError, AuthResult};
pub use refresh_monitor::{check_token_expiry, ExpiryCheck, TokenRefreshMonitor};
pub use runtime::{AuthSnapshot, ClientRuntime};
pub use session::{AuthStateCallback, HttpAuthSession};
