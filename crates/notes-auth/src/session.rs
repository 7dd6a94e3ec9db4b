//! Session controller with FSM-based state tracking.
//!
//! The controller owns the session lifecycle: restoring a stored session on
//! startup, logging in, logging out, and reacting to
//! [`TokenEvent::Expired`](crate::TokenEvent::Expired) by trying one refresh
//! before falling back to logout.
//!
//! Logout is reentrant-safe. A logout that starts while another one is
//! running returns immediately, so a user action racing an expiry cascade
//! clears the session and navigates away exactly once.
//!
//! Login and explicit refresh are superseding: starting a new one cancels the
//! previous task of the same kind, and a cancelled task never writes shared
//! state even if its network call completes afterwards.

use crate::api::AuthApi;
use crate::auth_state::{AuthSnapshot, AuthStateStore};
use crate::listeners::{ListenerRegistry, Subscription};
use crate::refresh::TokenRefreshCoordinator;
use crate::session_fsm::{SessionMachine, SessionMachineInput, SessionState, SessionStateChanged};
use crate::tasks::{TaskKind, TaskSlots, TaskTicket};
use crate::token_events::TokenEventBus;
use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use notes_storage::{CredentialStore, User};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Message left in the auth state after an expiry cascade.
pub const SESSION_EXPIRED_MESSAGE: &str = "Your session has expired. Please log in again.";

/// Why a logout happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// The user asked to log out.
    UserRequested,
    /// The session could not be refreshed.
    Expired,
}

impl std::fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogoutReason::UserRequested => f.write_str("user_requested"),
            LogoutReason::Expired => f.write_str("expired"),
        }
    }
}

/// Best-effort collaborators notified by the controller.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// Side registrations after a login is committed (push token, analytics
    /// identity). Errors are logged and never fail the login.
    async fn after_login(&self, _user: &User) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    /// Called once per logout of a signed-in session.
    fn navigate_to_signed_out(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {}

struct ControllerInner {
    credentials: Arc<CredentialStore>,
    auth_state: AuthStateStore,
    events: TokenEventBus,
    coordinator: TokenRefreshCoordinator,
    api: AuthApi,
    hooks: Arc<dyn SessionHooks>,
    /// Internal FSM for tracking session state transitions.
    fsm: Mutex<SessionMachine>,
    state_listeners: ListenerRegistry<SessionStateChanged>,
    tasks: TaskSlots,
    /// Serializes the "still current?" check with the writes that follow it.
    commit_lock: Mutex<()>,
    logout_in_progress: AtomicBool,
    initialized: AtomicBool,
    disposed: AtomicBool,
    expiry_subscription: Mutex<Option<Subscription>>,
}

/// Releases a task slot when the task returns.
struct TaskGuard<'a> {
    slots: &'a TaskSlots,
    ticket: TaskTicket,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.slots.finish(&self.ticket);
    }
}

/// Clears the logout flag when the logout returns.
struct LogoutGuard<'a>(&'a AtomicBool);

impl Drop for LogoutGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates login, logout and the expiry cascade. Cloning shares the
/// controller.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

impl SessionController {
    pub fn new(
        credentials: Arc<CredentialStore>,
        auth_state: AuthStateStore,
        events: TokenEventBus,
        coordinator: TokenRefreshCoordinator,
        api: AuthApi,
        hooks: Arc<dyn SessionHooks>,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                credentials,
                auth_state,
                events,
                coordinator,
                api,
                hooks,
                fsm: Mutex::new(SessionMachine::new()),
                state_listeners: ListenerRegistry::new(),
                tasks: TaskSlots::new(),
                commit_lock: Mutex::new(()),
                logout_in_progress: AtomicBool::new(false),
                initialized: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                expiry_subscription: Mutex::new(None),
            }),
        }
    }

    /// Restore the stored session and start listening for expiry events.
    ///
    /// Flips `is_initial_loading` to false once the credential read is done,
    /// whatever its outcome. Calling it again is a no-op.
    pub fn init(&self) -> AuthResult<()> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let subscription = self.inner.events.on_token_expired(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let controller = SessionController { inner };
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { controller.handle_token_expired().await });
                }
                Err(_) => warn!("Token expired outside a runtime, session not torn down"),
            }
        });
        *self.inner.expiry_subscription.lock() = Some(subscription);

        let restoring = self.transition(&SessionMachineInput::RestoreStarted).is_ok();
        let session = match self.inner.credentials.load() {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Failed to read stored session");
                self.inner.auth_state.finish_initial_load(None, None);
                if restoring {
                    let _ = self.transition(&SessionMachineInput::NoSession);
                }
                return Err(e.into());
            }
        };

        match session.pair {
            Some(pair) => {
                let user_id = session.user.as_ref().map(|u| u.id.clone());
                self.inner
                    .auth_state
                    .finish_initial_load(Some(&pair), session.user);
                if restoring {
                    let _ = self.transition(&SessionMachineInput::SessionRestored);
                }
                info!(user_id = ?user_id, "Restored stored session");
            }
            None => {
                self.inner.auth_state.finish_initial_load(None, None);
                if restoring {
                    let _ = self.transition(&SessionMachineInput::NoSession);
                }
                debug!("No stored session found");
            }
        }
        Ok(())
    }

    /// Stop reacting to expiry events and cancel running tasks. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(subscription) = self.inner.expiry_subscription.lock().take() {
            subscription.unsubscribe();
        }
        self.inner.tasks.cancel_all();
        debug!("Session controller disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Current FSM state.
    pub fn state(&self) -> SessionState {
        SessionState::from(self.inner.fsm.lock().state())
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.auth_state.snapshot()
    }

    /// Listen for auth state changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AuthSnapshot) + Send + Sync + 'static,
    {
        self.inner.auth_state.subscribe(listener)
    }

    /// Listen for FSM state changes.
    pub fn on_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionStateChanged) + Send + Sync + 'static,
    {
        self.inner.state_listeners.add(callback)
    }

    pub fn clear_error(&self) {
        self.inner.auth_state.clear_error();
    }

    /// Log in with email and password.
    ///
    /// A login started while this one is pending supersedes it: this call
    /// then returns [`AuthError::Superseded`] and leaves no trace.
    pub async fn login(&self, email: &str, password: &str) -> AuthResult<AuthSnapshot> {
        if self.inner.logout_in_progress.load(Ordering::SeqCst) {
            return Err(AuthError::LogoutInProgress);
        }
        if self.state().is_authenticated() {
            return Err(AuthError::AlreadyLoggedIn);
        }

        let ticket = self.inner.tasks.begin(TaskKind::Login);
        let _task = TaskGuard {
            slots: &self.inner.tasks,
            ticket: ticket.clone(),
        };

        self.transition(&SessionMachineInput::LoginAttempt)?;
        self.inner.auth_state.clear_error();
        debug!(email = %email, "Logging in");

        let result = tokio::select! {
            biased;
            _ = ticket.cancelled() => {
                debug!("Login superseded before the server answered");
                return Err(AuthError::Superseded);
            }
            result = self.inner.api.login(email, password) => result,
        };

        let user = {
            let _commit = self.inner.commit_lock.lock();
            if ticket.is_cancelled() {
                debug!("Login superseded, dropping its result");
                return Err(AuthError::Superseded);
            }

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    let err = match e.status_code() {
                        Some(400) | Some(401) => AuthError::InvalidCredentials(
                            e.api_error()
                                .map(|api| api.message.clone())
                                .unwrap_or_else(|| e.to_string()),
                        ),
                        _ => AuthError::Transport(e),
                    };
                    self.fail_login(&err);
                    return Err(err);
                }
            };

            let pair = response.pair();
            if let Err(e) = self
                .inner
                .credentials
                .save_session(&pair, response.user.as_ref())
            {
                let err = AuthError::from(e);
                self.fail_login(&err);
                return Err(err);
            }
            self.inner
                .auth_state
                .set_authenticated(&pair, response.user.clone());
            self.transition(&SessionMachineInput::LoginSuccess)?;
            response.user
        };

        match &user {
            Some(user) => {
                info!(user_id = %user.id, "Logged in");
                if let Err(e) = self.inner.hooks.after_login(user).await {
                    warn!(error = %e, "Post-login registration failed");
                }
            }
            None => info!("Logged in"),
        }

        Ok(self.inner.auth_state.snapshot())
    }

    fn fail_login(&self, err: &AuthError) {
        warn!(error = %err, "Login failed");
        self.inner.auth_state.set_error(err.to_string());
        let _ = self.transition(&SessionMachineInput::LoginFailed);
    }

    /// Log out. Local credentials are cleared even if the server cannot be
    /// reached.
    pub async fn logout(&self) -> AuthResult<()> {
        self.logout_with(LogoutReason::UserRequested).await
    }

    async fn logout_with(&self, reason: LogoutReason) -> AuthResult<()> {
        if self
            .inner
            .logout_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(reason = %reason, "Logout already in progress");
            return Ok(());
        }
        let _guard = LogoutGuard(&self.inner.logout_in_progress);

        let was_signed_in = self.state() != SessionState::Anonymous
            || matches!(self.inner.credentials.is_empty(), Ok(false));
        let _ = self.transition(&SessionMachineInput::LogoutRequested);

        let refresh_token = {
            let _commit = self.inner.commit_lock.lock();
            self.inner.tasks.cancel_all();
            self.inner.credentials.refresh_token().unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read refresh token for remote logout");
                None
            })
        };

        if let Some(token) = refresh_token {
            if let Err(e) = self.inner.api.logout(&token).await {
                warn!(error = %e, "Remote logout failed, clearing local session anyway");
            }
        }

        let cleared = {
            let _commit = self.inner.commit_lock.lock();
            self.inner.credentials.clear()
        };
        if let Err(e) = &cleared {
            warn!(error = %e, "Failed to clear stored credentials");
        }

        self.inner.auth_state.reset();
        if reason == LogoutReason::Expired && was_signed_in {
            self.inner.auth_state.set_error(SESSION_EXPIRED_MESSAGE);
        }
        let _ = self.transition(&SessionMachineInput::LogoutComplete);

        if was_signed_in {
            self.inner.hooks.navigate_to_signed_out();
        }
        info!(reason = %reason, "Logged out");

        cleared.map_err(AuthError::from)
    }

    /// Refresh the access token on demand.
    ///
    /// Returns `Ok(false)` when the session could not be refreshed and has
    /// been logged out.
    pub async fn refresh_session(&self) -> AuthResult<bool> {
        if self.inner.logout_in_progress.load(Ordering::SeqCst) {
            return Err(AuthError::LogoutInProgress);
        }
        if !self.state().is_authenticated() {
            return Err(AuthError::NotLoggedIn);
        }

        let ticket = self.inner.tasks.begin(TaskKind::Refresh);
        let _task = TaskGuard {
            slots: &self.inner.tasks,
            ticket: ticket.clone(),
        };

        let refreshing = self.transition(&SessionMachineInput::RefreshStarted).is_ok();
        let refreshed = tokio::select! {
            biased;
            _ = ticket.cancelled() => return Err(AuthError::Superseded),
            refreshed = self.inner.coordinator.refresh_access_token() => refreshed,
        };
        if ticket.is_cancelled() {
            return Err(AuthError::Superseded);
        }

        if refreshed {
            if refreshing {
                let _ = self.transition(&SessionMachineInput::RefreshSuccess);
            }
            return Ok(true);
        }

        if refreshing {
            let _ = self.transition(&SessionMachineInput::RefreshFailed);
        }
        self.logout_with(LogoutReason::Expired).await?;
        Ok(false)
    }

    /// React to an expired access token: refresh if possible, otherwise log
    /// out. Runs automatically for every expiry event after [`init`](Self::init).
    pub async fn handle_token_expired(&self) {
        if self.is_disposed() || self.inner.logout_in_progress.load(Ordering::SeqCst) {
            return;
        }

        let has_refresh_token = matches!(self.inner.credentials.refresh_token(), Ok(Some(_)));
        if has_refresh_token {
            let refreshing = self.transition(&SessionMachineInput::RefreshStarted).is_ok();
            if self.inner.coordinator.refresh_access_token().await {
                if refreshing {
                    let _ = self.transition(&SessionMachineInput::RefreshSuccess);
                }
                return;
            }
            if refreshing {
                let _ = self.transition(&SessionMachineInput::RefreshFailed);
            }
        } else if self.state() == SessionState::Anonymous
            && matches!(self.inner.credentials.is_empty(), Ok(true))
        {
            debug!("Token expired with no session, nothing to tear down");
            return;
        }

        if let Err(e) = self.logout_with(LogoutReason::Expired).await {
            warn!(error = %e, "Logout after token expiry failed");
        }
    }

    /// Replace the stored profile of the signed-in user.
    pub fn update_user(&self, user: User) -> AuthResult<()> {
        if !self.inner.auth_state.is_authenticated() {
            return Err(AuthError::NotLoggedIn);
        }
        self.inner.credentials.set_user(&user)?;
        self.inner.auth_state.set_user(user);
        Ok(())
    }

    /// Transition the FSM and notify listeners if the state changed.
    fn transition(&self, input: &SessionMachineInput) -> AuthResult<SessionState> {
        let (old_state, new_state) = {
            let mut fsm = self.inner.fsm.lock();
            let old_state = SessionState::from(fsm.state());
            fsm.consume(input).map_err(|_| {
                AuthError::InvalidStateTransition(format!(
                    "Cannot apply {:?} in state {:?}",
                    input,
                    fsm.state()
                ))
            })?;
            (old_state, SessionState::from(fsm.state()))
        };

        if old_state != new_state {
            debug!(
                old_state = %old_state,
                new_state = %new_state,
                "Session state transition"
            );
            let user_id = self.inner.auth_state.snapshot().user.map(|u| u.id);
            self.inner.state_listeners.notify(&SessionStateChanged {
                previous: old_state,
                state: new_state,
                user_id,
            });
        }

        Ok(new_state)
    }
}
