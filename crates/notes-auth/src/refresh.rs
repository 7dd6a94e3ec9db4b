//! Single-flight token refresh.
//!
//! At most one call to `auth/refresh` is in flight at any time. Callers that
//! arrive while it runs await the same shared future and get the same
//! answer. The refresh body runs on its own spawned task, so it finishes and
//! clears the in-flight slot even if every caller stops waiting.
//!
//! A refresh that fails for any reason (no refresh token, timeout, network
//! error, non-2xx) clears the session, marks the auth state signed out,
//! emits [`TokenEvent::Expired`](crate::TokenEvent::Expired) once and
//! resolves to `false`. It never returns an error.

use crate::api::AuthApi;
use crate::auth_state::AuthStateStore;
use crate::token_events::TokenEventBus;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use notes_storage::{CredentialPair, CredentialStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default upper bound on one refresh call.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

type RefreshTask = Shared<BoxFuture<'static, bool>>;

struct CoordinatorInner {
    credentials: Arc<CredentialStore>,
    api: AuthApi,
    events: TokenEventBus,
    auth_state: AuthStateStore,
    timeout: Duration,
    in_flight: Mutex<Option<RefreshTask>>,
}

/// Clears the in-flight slot when the refresh task ends, panics included.
struct ClearOnSettle(Arc<CoordinatorInner>);

impl Drop for ClearOnSettle {
    fn drop(&mut self) {
        self.0.in_flight.lock().take();
    }
}

/// Owns the refresh task. Cloning shares the coordinator.
#[derive(Clone)]
pub struct TokenRefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl TokenRefreshCoordinator {
    pub fn new(
        credentials: Arc<CredentialStore>,
        api: AuthApi,
        events: TokenEventBus,
        auth_state: AuthStateStore,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                credentials,
                api,
                events,
                auth_state,
                timeout,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// True while a refresh call is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Refresh the access token, joining the in-flight refresh if there is one.
    ///
    /// Returns `true` when fresh tokens were stored.
    pub async fn refresh_access_token(&self) -> bool {
        let task = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(task) => {
                    debug!("Joining in-flight token refresh");
                    task.clone()
                }
                None => {
                    let task = self.start();
                    *slot = Some(task.clone());
                    task
                }
            }
        };
        task.await
    }

    /// Spawn the refresh body. Must be called with the in-flight slot locked;
    /// the spawned task takes the same lock to clear it, so it cannot clear
    /// the slot before the caller has filled it.
    fn start(&self) -> RefreshTask {
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let _clear = ClearOnSettle(inner.clone());
            inner.run().await
        });

        async move {
            handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "Token refresh task aborted");
                false
            })
        }
        .boxed()
        .shared()
    }
}

impl CoordinatorInner {
    async fn run(&self) -> bool {
        let epoch = self.credentials.epoch();

        let refresh_token = match self.credentials.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!("No refresh token stored, session cannot be refreshed");
                self.expire(epoch);
                return false;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read refresh token");
                self.expire(epoch);
                return false;
            }
        };

        debug!(timeout_ms = self.timeout.as_millis() as u64, "Refreshing access token");
        let response = match tokio::time::timeout(self.timeout, self.api.refresh(&refresh_token)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(error = %e, "Token refresh failed");
                self.expire(epoch);
                return false;
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Token refresh timed out");
                self.expire(epoch);
                return false;
            }
        };

        let rotated = response.refresh_token.is_some();
        match self.credentials.replace_tokens(
            epoch,
            &response.access_token,
            response.refresh_token.as_deref(),
        ) {
            Ok(true) => {
                let pair = CredentialPair::new(
                    response.access_token,
                    response.refresh_token.unwrap_or(refresh_token),
                );
                self.auth_state.set_tokens(&pair);
                info!(rotated, "Access token refreshed");
                true
            }
            Ok(false) => {
                // Logged out or logged in again while the call was in flight
                debug!("Session changed during refresh, dropping refreshed tokens");
                false
            }
            Err(e) => {
                warn!(error = %e, "Failed to store refreshed tokens");
                self.expire(epoch);
                false
            }
        }
    }

    /// Tear down the session this refresh was started for and announce it.
    /// Does nothing if that session already ended.
    fn expire(&self, epoch: u64) {
        match self.credentials.clear_if_current(epoch) {
            Ok(false) => {
                debug!("Session changed during refresh, not expiring it");
                return;
            }
            Ok(true) => {}
            Err(e) => warn!(error = %e, "Failed to clear credentials after refresh failure"),
        }
        self.auth_state.reset();
        self.events.emit_token_expired();
    }
}
