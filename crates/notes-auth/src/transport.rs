//! Authenticated transport.
//!
//! Every request gets `Authorization: Bearer <access token>` when a session
//! is stored. A `401` answer runs the request through this lifecycle:
//!
//! ```text
//! Sent ──401──► Refreshing ──refreshed──► Retried ──any status──► Settled
//!   │                │                        │
//!   └─other──► Settled └─refresh failed──► Settled (Unauthorized)
//! ```
//!
//! The retry budget lives on the request context: a request is resent at most
//! once, and a `401` on the resend is final. No other status is retried.
//!
//! A `401` for a token that has since been replaced skips `Refreshing` and
//! goes straight to `Retried` with the stored token, so a late answer to a
//! request sent before a refresh does not start another one.

use crate::error::{TransportError, TransportResult};
use crate::http::{ApiRequest, ApiResponse, HttpBackend};
use crate::refresh::TokenRefreshCoordinator;
use notes_storage::CredentialStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

const UNAUTHORIZED: u16 = 401;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestPhase {
    Sent,
    Refreshing,
    Retried,
    Settled,
}

/// Per-request state. The original request is kept unmodified; the bearer
/// header is attached to a copy on every dispatch.
struct RequestContext {
    id: Uuid,
    request: ApiRequest,
    phase: RequestPhase,
    retried: bool,
    /// Access token attached to the last dispatch
    sent_token: Option<String>,
}

impl RequestContext {
    fn new(request: ApiRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            phase: RequestPhase::Sent,
            retried: false,
            sent_token: None,
        }
    }

    /// Move to `Refreshing` after a 401. Returns false once the retry
    /// budget is spent.
    fn begin_refresh(&mut self) -> bool {
        if self.retried {
            return false;
        }
        self.phase = RequestPhase::Refreshing;
        true
    }

    fn begin_retry(&mut self) {
        self.retried = true;
        self.phase = RequestPhase::Retried;
    }

    fn settle(&mut self) {
        self.phase = RequestPhase::Settled;
    }
}

/// HTTP client wrapper that authenticates requests and recovers from an
/// expired access token with one coordinated refresh.
#[derive(Clone)]
pub struct AuthenticatedTransport {
    backend: Arc<dyn HttpBackend>,
    credentials: Arc<CredentialStore>,
    coordinator: TokenRefreshCoordinator,
}

impl AuthenticatedTransport {
    pub fn new(
        backend: Arc<dyn HttpBackend>,
        credentials: Arc<CredentialStore>,
        coordinator: TokenRefreshCoordinator,
    ) -> Self {
        Self {
            backend,
            credentials,
            coordinator,
        }
    }

    /// Send a request.
    ///
    /// Non-2xx answers become [`TransportError::Api`]; a `401` that refresh
    /// could not fix becomes [`TransportError::Unauthorized`].
    pub async fn send(&self, request: ApiRequest) -> TransportResult<ApiResponse> {
        let mut ctx = RequestContext::new(request);

        loop {
            let response = self.dispatch(&mut ctx).await?;

            if response.status != UNAUTHORIZED {
                ctx.settle();
                return response.error_for_status();
            }

            let error = response.api_error();
            if !ctx.begin_refresh() {
                warn!(request_id = %ctx.id, path = %ctx.request.path, "Still unauthorized after refresh");
                ctx.settle();
                return Err(TransportError::Unauthorized(error));
            }

            if self.token_replaced_since(&ctx) {
                debug!(request_id = %ctx.id, path = %ctx.request.path, "Unauthorized with a replaced token, retrying");
            } else {
                debug!(request_id = %ctx.id, path = %ctx.request.path, "Unauthorized, refreshing token");
                if !self.coordinator.refresh_access_token().await {
                    ctx.settle();
                    return Err(TransportError::Unauthorized(error));
                }
            }

            ctx.begin_retry();
        }
    }

    /// True when a different access token is stored than the one `ctx` was sent with.
    fn token_replaced_since(&self, ctx: &RequestContext) -> bool {
        match self.credentials.access_token() {
            Ok(Some(current)) => ctx.sent_token.as_deref() != Some(current.as_str()),
            _ => false,
        }
    }

    async fn dispatch(&self, ctx: &mut RequestContext) -> TransportResult<ApiResponse> {
        let mut request = ctx.request.clone();

        ctx.sent_token = match self.credentials.access_token() {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Failed to read access token, sending without it");
                None
            }
        };
        if let Some(token) = &ctx.sent_token {
            request = request.bearer(token);
        }

        debug!(
            request_id = %ctx.id,
            phase = ?ctx.phase,
            method = request.method.as_str(),
            path = %request.path,
            authenticated = request.bearer_token().is_some(),
            "Dispatching request"
        );
        self.backend.execute(request).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> TransportResult<T> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> TransportResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?).await?.json()
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> TransportResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)?).await?.json()
    }

    pub async fn delete(&self, path: &str) -> TransportResult<()> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }
}
