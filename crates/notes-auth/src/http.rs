//! HTTP backend seam.
//!
//! [`HttpBackend`] executes one request and returns whatever the server
//! answered, without interpreting status codes. [`ReqwestBackend`] is the
//! production implementation; tests script their own.

use crate::error::{ApiError, TransportError, TransportResult};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// HTTP methods used by the notes API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(TransportError::InvalidRequest(format!(
                "Unsupported method: {}",
                other
            ))),
        }
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

pub const AUTHORIZATION: &str = "Authorization";

/// A request relative to the API base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    /// Path relative to the base URL, e.g. `notes/42`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Overrides the backend's default timeout.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Set a JSON body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> TransportResult<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Add or replace a header (names compare case-insensitively).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header(AUTHORIZATION, format!("Bearer {}", token))
    }

    /// The bearer token carried by this request, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.header_value(AUTHORIZATION)?.strip_prefix("Bearer ")
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Raw response: status and body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON. An empty body decodes as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> TransportResult<T> {
        let body: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &self.body
        };
        serde_json::from_slice(body).map_err(|e| TransportError::Decode(e.to_string()))
    }

    /// `Ok(self)` for 2xx, otherwise the typed backend error.
    pub fn error_for_status(self) -> TransportResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::Api(self.api_error()))
        }
    }

    pub fn api_error(&self) -> ApiError {
        ApiError::from_body(self.status, &self.body)
    }
}

/// Executes requests against the API.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// Send `request` and return the response, whatever its status.
    /// Errors are reserved for failures where no response was received.
    async fn execute(&self, request: ApiRequest) -> TransportResult<ApiResponse>;
}

/// [`HttpBackend`] over `reqwest`.
pub struct ReqwestBackend {
    client: Client,
    base_url: Url,
    default_timeout: Duration,
}

impl ReqwestBackend {
    /// `base_url` should end in `/` so relative paths keep its path segment.
    pub fn new(base_url: Url, default_timeout: Duration) -> TransportResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("notes-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        Ok(Self::with_client(client, base_url, default_timeout))
    }

    pub fn with_client(client: Client, base_url: Url, default_timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            default_timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resolve(&self, path: &str) -> TransportResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", path, e)))
    }

    fn map_error(error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn execute(&self, request: ApiRequest) -> TransportResult<ApiResponse> {
        let url = self.resolve(&request.path)?;
        debug!(method = request.method.as_str(), url = %url, "Sending request");

        let mut builder = self
            .client
            .request(request.method.into(), url)
            .timeout(request.timeout.unwrap_or(self.default_timeout));

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(Self::map_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(Self::map_error)?;

        debug!(status, bytes = body.len(), "Received response");
        Ok(ApiResponse::new(status, body.to_vec()))
    }
}
