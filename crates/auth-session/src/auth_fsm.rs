//! Authentication state machine using rust-fsm.
//!
//! The machine tracks what the session is doing right now. Tokens and user
//! data live in the key-value store; the machine only says whether they are
//! being created, used, replaced or thrown away.
//!
//! ## Transitions
//!
//! ```text
//! LoggedOut  ── LoginAttempt ──────► LoggingIn  ── LoginSuccess ──► LoggedIn
//!                                               └─ LoginFailed ───► LoggedOut
//! LoggedOut  ── SessionRestored ───► LoggedIn
//! LoggedOut  ── TokenExpired ──────► Refreshing
//! LoggedIn   ── TokenExpired ──────► Refreshing ── RefreshSuccess ► LoggedIn
//!                                               └─ RefreshFailed ─► LoggedOut
//! LoggedIn   ── LogoutRequested ───► LoggingOut ── LogoutComplete ► LoggedOut
//! ```
//!
//! `LogoutRequested` is accepted from every settled state: the API client
//! may force a logout at any time.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub auth_machine(LoggedOut)

    LoggedOut => {
        LoginAttempt => LoggingIn,
        SessionRestored => LoggedIn,
        // A persisted session whose token is already stale
        TokenExpired => Refreshing,
        LogoutRequested => LoggingOut
    },
    LoggingIn => {
        LoginSuccess => LoggedIn,
        LoginFailed => LoggedOut
    },
    LoggedIn => {
        // Logging in as someone else replaces the session
        LoginAttempt => LoggingIn,
        TokenExpired => Refreshing,
        LogoutRequested => LoggingOut
    },
    Refreshing => {
        RefreshSuccess => LoggedIn,
        RefreshFailed => LoggedOut,
        LogoutRequested => LoggingOut
    },
    LoggingOut => {
        LogoutComplete => LoggedOut
    }
}

pub use auth_machine::Input as AuthMachineInput;
pub use auth_machine::State as AuthMachineState;
pub use auth_machine::StateMachine as AuthMachine;

/// Authentication state for external consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    LoggedOut,
    LoggingIn,
    LoggedIn,
    Refreshing,
    LoggingOut,
}

impl AuthState {
    /// Only `LoggedIn` counts; a refresh in progress may still fail.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::LoggedIn)
    }

    /// Returns true if the state is an in-progress state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthState::LoggingIn | AuthState::Refreshing | AuthState::LoggingOut
        )
    }
}

impl From<&AuthMachineState> for AuthState {
    fn from(state: &AuthMachineState) -> Self {
        match state {
            AuthMachineState::LoggedOut => AuthState::LoggedOut,
            AuthMachineState::LoggingIn => AuthState::LoggingIn,
            AuthMachineState::LoggedIn => AuthState::LoggedIn,
            AuthMachineState::Refreshing => AuthState::Refreshing,
            AuthMachineState::LoggingOut => AuthState::LoggingOut,
        }
    }
}

/// Payload for auth state change events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthStateChangedPayload {
    /// Current auth state.
    pub state: AuthState,
    /// Id of the stored user, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logged_in() -> AuthMachine {
        let mut machine = AuthMachine::new();
        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
        machine.consume(&AuthMachineInput::LoginSuccess).unwrap();
        machine
    }

    #[test]
    fn test_initial_state_is_logged_out() {
        let machine = AuthMachine::new();
        assert_eq!(*machine.state(), AuthMachineState::LoggedOut);
    }

    #[test]
    fn test_login_flow() {
        let machine = logged_in();
        assert_eq!(*machine.state(), AuthMachineState::LoggedIn);
        assert!(AuthState::from(machine.state()).is_authenticated());
    }

    #[test]
    fn test_login_failure_returns_to_logged_out() {
        let mut machine = AuthMachine::new();
        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
        machine.consume(&AuthMachineInput::LoginFailed).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::LoggedOut);
    }

    #[test]
    fn test_restored_session() {
        let mut machine = AuthMachine::new();
        machine.consume(&AuthMachineInput::SessionRestored).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::LoggedIn);
    }

    #[test]
    fn test_refresh_success_and_failure() {
        let mut machine = logged_in();
        machine.consume(&AuthMachineInput::TokenExpired).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Refreshing);
        assert!(AuthState::from(machine.state()).is_transient());
        machine.consume(&AuthMachineInput::RefreshSuccess).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::LoggedIn);

        machine.consume(&AuthMachineInput::TokenExpired).unwrap();
        machine.consume(&AuthMachineInput::RefreshFailed).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::LoggedOut);
    }

    #[test]
    fn test_stale_persisted_session_refreshes_from_logged_out() {
        let mut machine = AuthMachine::new();
        machine.consume(&AuthMachineInput::TokenExpired).unwrap();
        assert_eq!(*machine.state(), AuthMachineState::Refreshing);
    }

    #[test]
    fn test_logout_from_any_settled_state() {
        for setup in [
            vec![],
            vec![AuthMachineInput::SessionRestored],
            vec![AuthMachineInput::SessionRestored, AuthMachineInput::TokenExpired],
        ] {
            let mut machine = AuthMachine::new();
            for input in &setup {
                machine.consume(input).unwrap();
            }
            machine.consume(&AuthMachineInput::LogoutRequested).unwrap();
            assert_eq!(*machine.state(), AuthMachineState::LoggingOut);
            machine.consume(&AuthMachineInput::LogoutComplete).unwrap();
            assert_eq!(*machine.state(), AuthMachineState::LoggedOut);
        }
    }

    #[test]
    fn test_cannot_refresh_while_logging_in() {
        let mut machine = AuthMachine::new();
        machine.consume(&AuthMachineInput::LoginAttempt).unwrap();
        assert!(machine.consume(&AuthMachineInput::TokenExpired).is_err());
        assert_eq!(*machine.state(), AuthMachineState::LoggingIn);
    }

    #[test]
    fn test_payload_serialization() {
        let payload = AuthStateChangedPayload {
            state: AuthState::LoggedIn,
            user_id: Some("42".to_string()),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["state"], "logged_in");
        assert_eq!(json["user_id"], "42");

        let logged_out = AuthStateChangedPayload {
            state: AuthState::LoggedOut,
            user_id: None,
        };
        let json = serde_json::to_value(&logged_out).unwrap();
        assert!(json.get("user_id").is_none());
    }
}
