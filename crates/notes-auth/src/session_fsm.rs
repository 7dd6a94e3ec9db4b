//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//!                 RestoreStarted
//! ┌─────────────┐ ─────────────► ┌─────────────┐
//! │  Anonymous  │ ◄───NoSession── │  Restoring  │
//! └──────┬──────┘                └──────┬──────┘
//!        │ LoginAttempt                 │ SessionRestored
//!        ▼                              │
//! ┌────────────────┐  LoginSuccess      ▼
//! │ Authenticating │ ──────────► ┌───────────────┐  RefreshStarted  ┌────────────┐
//! └────────────────┘             │ Authenticated │ ───────────────► │ Refreshing │
//!   │ LoginFailed                └───────┬───────┘ ◄─RefreshSuccess─ └─────┬──────┘
//!   ▼                                    │ LogoutRequested                 │ RefreshFailed
//! Anonymous                              ▼                                 │
//!                                ┌─────────────┐ ◄───────────────────────────┘
//!                                │ LoggingOut  │
//!                                └──────┬──────┘
//!                                       │ LogoutComplete
//!                                       ▼
//!                                   Anonymous
//! ```
//!
//! A new `LoginAttempt` is accepted while another login is pending; the
//! newer one supersedes it. Switching accounts requires a logout first.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Anonymous)

    Anonymous => {
        RestoreStarted => Restoring,
        LoginAttempt => Authenticating,
        LogoutRequested => LoggingOut
    },
    Restoring => {
        SessionRestored => Authenticated,
        NoSession => Anonymous,
        LoginAttempt => Authenticating
    },
    Authenticating => {
        LoginAttempt => Authenticating,
        LoginSuccess => Authenticated,
        LoginFailed => Anonymous,
        LogoutRequested => LoggingOut
    },
    Authenticated => {
        RefreshStarted => Refreshing,
        LogoutRequested => LoggingOut
    },
    Refreshing => {
        RefreshStarted => Refreshing,
        RefreshSuccess => Authenticated,
        RefreshFailed => LoggingOut,
        LogoutRequested => LoggingOut
    },
    LoggingOut => {
        LogoutComplete => Anonymous
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Session mode exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Anonymous,
    Restoring,
    Authenticating,
    Authenticated,
    Refreshing,
    LoggingOut,
}

impl SessionState {
    /// True while a usable session exists (refreshing keeps the old one usable).
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Refreshing)
    }

    /// True for in-progress states.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SessionState::Restoring
                | SessionState::Authenticating
                | SessionState::Refreshing
                | SessionState::LoggingOut
        )
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Anonymous => SessionState::Anonymous,
            SessionMachineState::Restoring => SessionState::Restoring,
            SessionMachineState::Authenticating => SessionState::Authenticating,
            SessionMachineState::Authenticated => SessionState::Authenticated,
            SessionMachineState::Refreshing => SessionState::Refreshing,
            SessionMachineState::LoggingOut => SessionState::LoggingOut,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Anonymous => "anonymous",
            SessionState::Restoring => "restoring",
            SessionState::Authenticating => "authenticating",
            SessionState::Authenticated => "authenticated",
            SessionState::Refreshing => "refreshing",
            SessionState::LoggingOut => "logging_out",
        };
        f.write_str(name)
    }
}

/// Payload passed to state-change callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStateChanged {
    pub previous: SessionState,
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consume_all(machine: &mut SessionMachine, inputs: &[SessionMachineInput]) {
        for input in inputs {
            machine.consume(input).unwrap();
        }
    }

    #[test]
    fn test_initial_state() {
        let machine = SessionMachine::new();
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_login_success_path() {
        let mut machine = SessionMachine::new();
        consume_all(
            &mut machine,
            &[SessionMachineInput::LoginAttempt, SessionMachineInput::LoginSuccess],
        );
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_login_failure_returns_to_anonymous() {
        let mut machine = SessionMachine::new();
        consume_all(
            &mut machine,
            &[SessionMachineInput::LoginAttempt, SessionMachineInput::LoginFailed],
        );
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_superseding_login_stays_authenticating() {
        let mut machine = SessionMachine::new();
        consume_all(
            &mut machine,
            &[SessionMachineInput::LoginAttempt, SessionMachineInput::LoginAttempt],
        );
        assert_eq!(*machine.state(), SessionMachineState::Authenticating);
    }

    #[test]
    fn test_restore_paths() {
        let mut machine = SessionMachine::new();
        consume_all(
            &mut machine,
            &[SessionMachineInput::RestoreStarted, SessionMachineInput::SessionRestored],
        );
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);

        let mut machine = SessionMachine::new();
        consume_all(
            &mut machine,
            &[SessionMachineInput::RestoreStarted, SessionMachineInput::NoSession],
        );
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_refresh_round_trip() {
        let mut machine = SessionMachine::new();
        consume_all(
            &mut machine,
            &[
                SessionMachineInput::LoginAttempt,
                SessionMachineInput::LoginSuccess,
                SessionMachineInput::RefreshStarted,
                SessionMachineInput::RefreshSuccess,
            ],
        );
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);
    }

    #[test]
    fn test_refresh_failure_leads_to_logout() {
        let mut machine = SessionMachine::new();
        consume_all(
            &mut machine,
            &[
                SessionMachineInput::LoginAttempt,
                SessionMachineInput::LoginSuccess,
                SessionMachineInput::RefreshStarted,
                SessionMachineInput::RefreshFailed,
            ],
        );
        assert_eq!(*machine.state(), SessionMachineState::LoggingOut);

        machine.consume(&SessionMachineInput::LogoutComplete).unwrap();
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut machine = SessionMachine::new();
        assert!(machine.consume(&SessionMachineInput::LoginSuccess).is_err());
        assert!(machine.consume(&SessionMachineInput::RefreshStarted).is_err());
        assert!(machine.consume(&SessionMachineInput::LogoutComplete).is_err());
        assert_eq!(*machine.state(), SessionMachineState::Anonymous);

        consume_all(
            &mut machine,
            &[SessionMachineInput::LoginAttempt, SessionMachineInput::LoginSuccess],
        );
        assert!(machine.consume(&SessionMachineInput::LoginAttempt).is_err());
        assert_eq!(*machine.state(), SessionMachineState::Authenticated);

        consume_all(&mut machine, &[SessionMachineInput::LogoutRequested]);
        assert!(machine.consume(&SessionMachineInput::LoginAttempt).is_err());
        assert!(machine.consume(&SessionMachineInput::LogoutRequested).is_err());
    }

    #[test]
    fn test_session_state_predicates() {
        assert!(SessionState::Authenticated.is_authenticated());
        assert!(SessionState::Refreshing.is_authenticated());
        assert!(!SessionState::LoggingOut.is_authenticated());

        assert!(SessionState::LoggingOut.is_transient());
        assert!(!SessionState::Anonymous.is_transient());
        assert!(!SessionState::Authenticated.is_transient());
    }

    #[test]
    fn test_session_state_serialization() {
        let json = serde_json::to_string(&SessionState::LoggingOut).unwrap();
        assert_eq!(json, "\"logging_out\"");
        assert_eq!(SessionState::LoggingOut.to_string(), "logging_out");
    }
}
