//! Session runtime wiring.
//!
//! Builds one credential store, auth state store, token event bus, refresh
//! coordinator, transport and session controller, all sharing the same
//! instances. Nothing is global: two runtimes are two independent sessions.

use crate::api::AuthApi;
use crate::auth_state::AuthStateStore;
use crate::http::{HttpBackend, ReqwestBackend};
use crate::refresh::{TokenRefreshCoordinator, DEFAULT_REFRESH_TIMEOUT};
use crate::session::{NoopHooks, SessionController, SessionHooks};
use crate::token_events::TokenEventBus;
use crate::transport::AuthenticatedTransport;
use crate::AuthResult;
use notes_config_and_utils::{Config, Paths};
use notes_storage::{create_storage, CredentialStore, MemoryStorage, SecureStorage};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builder for [`AuthRuntime`].
pub struct AuthRuntimeBuilder {
    base_url: Url,
    storage: Option<Box<dyn SecureStorage>>,
    backend: Option<Arc<dyn HttpBackend>>,
    hooks: Option<Arc<dyn SessionHooks>>,
    refresh_timeout: Duration,
    request_timeout: Duration,
}

impl AuthRuntimeBuilder {
    /// Storage backend for credentials. Defaults to in-memory storage.
    pub fn storage(mut self, storage: Box<dyn SecureStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// HTTP backend. Defaults to a reqwest client rooted at the base URL.
    pub fn backend(mut self, backend: Arc<dyn HttpBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> AuthResult<AuthRuntime> {
        let backend: Arc<dyn HttpBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(ReqwestBackend::new(self.base_url.clone(), self.request_timeout)?),
        };
        let storage = self
            .storage
            .unwrap_or_else(|| Box::new(MemoryStorage::new()));
        let hooks = self.hooks.unwrap_or_else(|| Arc::new(NoopHooks));

        let credentials = Arc::new(CredentialStore::new(storage));
        let auth_state = AuthStateStore::new();
        let events = TokenEventBus::new();
        let api = AuthApi::new(backend.clone());
        let coordinator = TokenRefreshCoordinator::new(
            credentials.clone(),
            api.clone(),
            events.clone(),
            auth_state.clone(),
            self.refresh_timeout,
        );
        let transport =
            AuthenticatedTransport::new(backend, credentials.clone(), coordinator.clone());
        let session = SessionController::new(
            credentials.clone(),
            auth_state.clone(),
            events.clone(),
            coordinator.clone(),
            api,
            hooks,
        );

        debug!(
            base_url = %self.base_url,
            refresh_timeout_ms = self.refresh_timeout.as_millis() as u64,
            "Auth runtime built"
        );

        Ok(AuthRuntime {
            base_url: self.base_url,
            credentials,
            auth_state,
            events,
            coordinator,
            transport,
            session,
        })
    }
}

/// One session's worth of auth services.
#[derive(Clone)]
pub struct AuthRuntime {
    base_url: Url,
    credentials: Arc<CredentialStore>,
    auth_state: AuthStateStore,
    events: TokenEventBus,
    coordinator: TokenRefreshCoordinator,
    transport: AuthenticatedTransport,
    session: SessionController,
}

impl AuthRuntime {
    pub fn builder(base_url: Url) -> AuthRuntimeBuilder {
        AuthRuntimeBuilder {
            base_url,
            storage: None,
            backend: None,
            hooks: None,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Build a runtime from loaded configuration, using the configured
    /// storage backend and timeouts.
    pub fn from_config(config: &Config, paths: &Paths) -> AuthResult<Self> {
        let storage = create_storage(config.storage_backend, paths)?;
        Self::builder(config.api_base_url()?)
            .storage(storage)
            .refresh_timeout(config.refresh_timeout())
            .request_timeout(config.request_timeout())
            .build()
    }

    /// Restore the stored session. See [`SessionController::init`].
    pub fn init(&self) -> AuthResult<()> {
        self.session.init()
    }

    /// See [`SessionController::dispose`].
    pub fn dispose(&self) {
        self.session.dispose();
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    pub fn auth_state(&self) -> &AuthStateStore {
        &self.auth_state
    }

    pub fn events(&self) -> &TokenEventBus {
        &self.events
    }

    pub fn coordinator(&self) -> &TokenRefreshCoordinator {
        &self.coordinator
    }

    pub fn transport(&self) -> &AuthenticatedTransport {
        &self.transport
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }
}
