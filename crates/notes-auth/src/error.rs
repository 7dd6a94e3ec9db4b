//! Error types for the session core.

use notes_storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the backend for non-2xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Build an error from a response status and raw body.
    ///
    /// The HTTP status always wins over a `statusCode` in the body. Bodies
    /// that are not the documented error shape still produce an error
    /// carrying the real status, with the body text as the message.
    pub fn from_body(status: u16, body: &[u8]) -> Self {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire {
            code: Option<i64>,
            message: Option<serde_json::Value>,
            details: Option<serde_json::Value>,
        }

        let text = String::from_utf8_lossy(body).trim().to_string();
        let Ok(wire) = serde_json::from_slice::<Wire>(body) else {
            return Self::plain(status, text);
        };

        let message = match wire.message {
            Some(serde_json::Value::String(message)) => message,
            // some validation errors return a list of messages
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
                .collect::<Vec<_>>()
                .join("; "),
            Some(other) => other.to_string(),
            None => default_message(status),
        };

        Self {
            status_code: status,
            code: wire.code,
            message,
            details: wire.details,
        }
    }

    fn plain(status: u16, text: String) -> Self {
        Self {
            status_code: status,
            code: None,
            message: if text.is_empty() {
                default_message(status)
            } else {
                text
            },
            details: None,
        }
    }
}

fn default_message(status: u16) -> String {
    reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status))
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {}: {}", self.status_code, self.message)?;
        if let Some(code) = self.code {
            write!(f, " (code {})", code)?;
        }
        Ok(())
    }
}

/// Failure of a single HTTP exchange.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Non-2xx response other than an unrecoverable 401
    #[error("{0}")]
    Api(ApiError),

    /// 401 that refresh could not fix
    #[error("Unauthorized: {0}")]
    Unauthorized(ApiError),

    /// Connection-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Response body did not match the expected type
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// Request could not be built (bad path, bad header)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// HTTP status of the response, if one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Api(e) | TransportError::Unauthorized(e) => Some(e.status_code),
            _ => None,
        }
    }

    /// Typed backend error body, if one was received.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            TransportError::Api(e) | TransportError::Unauthorized(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Network(_) | TransportError::Timeout => true,
            TransportError::Api(e) => e.status_code >= 500,
            _ => false,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Session-level error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Login rejected by the backend
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Operation needs a signed-in session
    #[error("Not logged in")]
    NotLoggedIn,

    /// Login attempted while a session is active
    #[error("Already logged in")]
    AlreadyLoggedIn,

    /// A newer task of the same kind replaced this one; its result was dropped
    #[error("Superseded by a newer request")]
    Superseded,

    /// A logout is tearing the session down
    #[error("Logout in progress")]
    LogoutInProgress,

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// HTTP exchange failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<notes_config_and_utils::CoreError> for AuthError {
    fn from(e: notes_config_and_utils::CoreError) -> Self {
        AuthError::Config(e.to_string())
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
