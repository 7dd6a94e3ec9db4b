//! Configuration management for the notes client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Default API base URL (can be overridden at compile time via NOTES_API_URL env var).
pub const DEFAULT_API_BASE_URL: &str = match option_env!("NOTES_API_URL") {
    Some(url) => url,
    None => "https://api.notes.local/",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Where credentials are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    /// macOS Keychain or Linux Secret Service.
    #[default]
    Platform,
    /// JSON file under the base directory, readable only by the owner.
    File,
    /// Process memory; nothing survives a restart.
    Memory,
}

impl FromStr for StorageBackendKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "platform" | "keychain" => Ok(Self::Platform),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(CoreError::Config(format!("Unknown storage backend: {}", other))),
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL that relative endpoints such as `auth/refresh` are joined onto.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Upper bound on a single call to the refresh endpoint.
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    /// Per-request timeout for every other call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub storage_backend: StorageBackendKind,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_refresh_timeout_ms() -> u64 {
    DEFAULT_REFRESH_TIMEOUT_MS
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_base_url: default_api_base_url(),
            refresh_timeout_ms: DEFAULT_REFRESH_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            storage_backend: StorageBackendKind::default(),
        }
    }
}

impl Config {
    /// Load configuration from `config.json` under `paths`, falling back to
    /// defaults, then apply `NOTES_*` environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Apply `NOTES_LOG_LEVEL`, `NOTES_API_URL` and `NOTES_STORAGE_BACKEND`
    /// as resolved by `lookup`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(level) = lookup("NOTES_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(url) = lookup("NOTES_API_URL") {
            self.api_base_url = url;
        }
        if let Some(backend) = lookup("NOTES_STORAGE_BACKEND") {
            self.storage_backend = backend.parse()?;
        }
        Ok(())
    }

    /// The API base URL, always ending in `/` so relative joins keep its path.
    pub fn api_base_url(&self) -> CoreResult<Url> {
        let mut raw = self.api_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Ok(Url::parse(&raw)?)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
