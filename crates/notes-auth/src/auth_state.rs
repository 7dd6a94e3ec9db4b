//! Observable auth state consumed by the UI layer.
//!
//! The store holds an [`AuthSnapshot`] derived from the credential store.
//! Only the session controller and the refresh coordinator mutate it; every
//! mutation produces exactly one notification, delivered synchronously to
//! listeners in subscription order.

use crate::listeners::{ListenerRegistry, Subscription};
use notes_storage::{CredentialPair, User};
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use std::sync::Arc;

/// Point-in-time view of the session.
///
/// `is_authenticated` implies `access_token` is set. `is_initial_loading`
/// starts true and flips to false once, after the first credential read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    pub is_authenticated: bool,
    pub is_initial_loading: bool,
    pub error: Option<String>,
    pub user: Option<User>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            is_authenticated: false,
            is_initial_loading: true,
            error: None,
            user: None,
            access_token: None,
            refresh_token: None,
        }
    }
}

impl AuthSnapshot {
    fn apply_pair(&mut self, pair: Option<&CredentialPair>) {
        self.access_token = pair.map(|p| p.access_token.clone());
        self.refresh_token = pair.map(|p| p.refresh_token.clone());
        self.is_authenticated = pair.is_some();
    }
}

struct StoreInner {
    state: Mutex<AuthSnapshot>,
    /// Held across mutate-and-notify so notifications from different threads
    /// cannot overtake each other. Reentrant so listeners may read the store.
    notify_gate: ReentrantMutex<()>,
    listeners: ListenerRegistry<AuthSnapshot>,
}

/// Shared, observable [`AuthSnapshot`]. Cloning shares the store.
#[derive(Clone)]
pub struct AuthStateStore {
    inner: Arc<StoreInner>,
}

impl Default for AuthStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStateStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(AuthSnapshot::default()),
                notify_gate: ReentrantMutex::new(()),
                listeners: ListenerRegistry::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.lock().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().is_authenticated
    }

    /// Listen for changes. The listener is not called with the current
    /// value; read [`snapshot`](Self::snapshot) for that.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AuthSnapshot) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    /// Apply `f` and notify listeners with the result. Returns `false`
    /// (without notifying) when `f` declines the change.
    fn mutate(&self, f: impl FnOnce(&mut AuthSnapshot) -> bool) -> bool {
        let _gate = self.inner.notify_gate.lock();
        let snapshot = {
            let mut state = self.inner.state.lock();
            if !f(&mut state) {
                return false;
            }
            state.clone()
        };
        self.inner.listeners.notify(&snapshot);
        true
    }

    /// Record the result of the first credential read. Only the first call
    /// has an effect.
    pub(crate) fn finish_initial_load(
        &self,
        pair: Option<&CredentialPair>,
        user: Option<User>,
    ) -> bool {
        self.mutate(|state| {
            if !state.is_initial_loading {
                return false;
            }
            state.is_initial_loading = false;
            state.apply_pair(pair);
            state.user = if pair.is_some() { user } else { None };
            true
        })
    }

    /// A login succeeded.
    pub(crate) fn set_authenticated(&self, pair: &CredentialPair, user: Option<User>) {
        self.mutate(|state| {
            state.apply_pair(Some(pair));
            state.user = user;
            state.error = None;
            state.is_initial_loading = false;
            true
        });
    }

    /// Tokens were refreshed. Ignored when nobody is signed in.
    pub(crate) fn set_tokens(&self, pair: &CredentialPair) -> bool {
        self.mutate(|state| {
            if !state.is_authenticated {
                return false;
            }
            state.apply_pair(Some(pair));
            true
        })
    }

    pub(crate) fn set_user(&self, user: User) {
        self.mutate(|state| {
            state.user = Some(user);
            true
        });
    }

    pub(crate) fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.mutate(|state| {
            state.error = Some(message);
            true
        });
    }

    pub(crate) fn clear_error(&self) {
        self.mutate(|state| state.error.take().is_some());
    }

    /// Back to signed out. Keeps `error` so a failure message survives the teardown.
    pub(crate) fn reset(&self) {
        self.mutate(|state| {
            state.apply_pair(None);
            state.user = None;
            true
        });
    }
}
