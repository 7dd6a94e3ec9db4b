//! Unauthenticated auth endpoints.
//!
//! These go straight to the [`HttpBackend`] and never through the
//! authenticated transport, so a failing refresh cannot recurse into
//! another refresh.

use crate::error::TransportResult;
use crate::http::{ApiRequest, HttpBackend};
use notes_storage::{CredentialPair, User};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const LOGIN_PATH: &str = "auth/login";
pub const REFRESH_PATH: &str = "auth/refresh";
pub const LOGOUT_PATH: &str = "auth/logout";

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshTokenBody<'a> {
    refresh_token: &'a str,
}

/// `POST auth/login` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<User>,
}

impl LoginResponse {
    pub fn pair(&self) -> CredentialPair {
        CredentialPair::new(&self.access_token, &self.refresh_token)
    }
}

/// `POST auth/refresh` response. The server may omit the refresh token,
/// in which case the stored one stays valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `POST auth/logout` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutResponse {
    #[serde(default)]
    pub message: Option<String>,
}

/// Client for the `auth/*` endpoints.
#[derive(Clone)]
pub struct AuthApi {
    backend: Arc<dyn HttpBackend>,
}

impl AuthApi {
    pub fn new(backend: Arc<dyn HttpBackend>) -> Self {
        Self { backend }
    }

    pub async fn login(&self, email: &str, password: &str) -> TransportResult<LoginResponse> {
        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest { email, password })?;
        self.backend.execute(request).await?.error_for_status()?.json()
    }

    pub async fn refresh(&self, refresh_token: &str) -> TransportResult<RefreshResponse> {
        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshTokenBody { refresh_token })?;
        self.backend.execute(request).await?.error_for_status()?.json()
    }

    pub async fn logout(&self, refresh_token: &str) -> TransportResult<LogoutResponse> {
        let request = ApiRequest::post(LOGOUT_PATH).json(&RefreshTokenBody { refresh_token })?;
        let response = self.backend.execute(request).await?.error_for_status()?;
        Ok(response.json::<Option<LogoutResponse>>()?.unwrap_or_default())
    }
}
