//! Authenticated request lifecycle for the notes client.
//!
//! This crate provides:
//! - Observable auth state for the UI layer
//! - Single-flight access token refresh
//! - A token-expired event bus decoupling transport from session teardown
//! - An HTTP transport that injects the bearer token and retries once on 401
//! - A session controller with explicit FSM-based state management

mod api;
mod auth_state;
mod error;
mod http;
mod listeners;
mod refresh;
mod runtime;
mod session;
mod session_fsm;
mod tasks;
mod token_events;
mod transport;

#[cfg(test)]
mod tests;

pub use api::{AuthApi, LoginResponse, LogoutResponse, RefreshResponse, LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
pub use auth_state::{AuthSnapshot, AuthStateStore};
pub use error::{ApiError, AuthError, AuthResult, TransportError, TransportResult};
pub use http::{ApiRequest, ApiResponse, HttpBackend, HttpMethod, ReqwestBackend, AUTHORIZATION};
pub use listeners::Subscription;
pub use refresh::{TokenRefreshCoordinator, DEFAULT_REFRESH_TIMEOUT};
pub use runtime::{AuthRuntime, AuthRuntimeBuilder};
pub use session::{LogoutReason, NoopHooks, SessionController, SessionHooks, SESSION_EXPIRED_MESSAGE};
pub use session_fsm::session_machine;
pub use session_fsm::{
    SessionMachine, SessionMachineInput, SessionMachineState, SessionState, SessionStateChanged,
};
pub use tasks::{TaskKind, TaskSlots, TaskTicket};
pub use token_events::{TokenEvent, TokenEventBus};
pub use transport::AuthenticatedTransport;

pub use notes_storage::{CredentialPair, CredentialStore, User};
