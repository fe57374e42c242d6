//! Client configuration loaded from environment variables.
//!
//! Every setting has a default pointing at a backend on localhost, so the
//! client starts with zero configuration for local development.

use std::path::PathBuf;
use std::time::Duration;

use forum_chat_net::{ApiConfig, RealtimeConfig};
use forum_chat_shared::constants::{
    DEFAULT_API_URL, DEFAULT_EVENT_BUFFER, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_WS_URL,
};
use forum_chat_store::{FileCredentials, StoreError};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API.
    /// Env: `FORUM_API_URL`
    /// Default: `http://localhost:8000/api/v1`
    pub api_url: String,

    /// URL of the realtime WebSocket endpoint.
    /// Env: `FORUM_WS_URL`
    /// Default: `ws://localhost:8000/api/v1/ws/connect`
    pub ws_url: String,

    /// Where the credential pair is persisted.
    /// Env: `FORUM_CREDENTIALS_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub credentials_path: Option<PathBuf>,

    /// Per-request HTTP timeout.
    /// Env: `FORUM_REQUEST_TIMEOUT_SECS`
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// Capacity of the realtime delivery channel.
    /// Env: `FORUM_EVENT_BUFFER`
    /// Default: `256`
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            credentials_path: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("FORUM_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }

        if let Some(url) = lookup("FORUM_WS_URL") {
            if url.starts_with("ws://") || url.starts_with("wss://") {
                config.ws_url = url;
            } else {
                tracing::warn!(value = %url, "Invalid FORUM_WS_URL, using default");
            }
        }

        if let Some(path) = lookup("FORUM_CREDENTIALS_PATH") {
            if !path.is_empty() {
                config.credentials_path = Some(PathBuf::from(path));
            }
        }

        if let Some(val) = lookup("FORUM_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.request_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid FORUM_REQUEST_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = lookup("FORUM_EVENT_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.event_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid FORUM_EVENT_BUFFER, using default"),
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn api(&self) -> ApiConfig {
        ApiConfig {
            base_url: self.api_url.clone(),
            timeout: self.request_timeout,
        }
    }

    pub fn realtime(&self) -> RealtimeConfig {
        RealtimeConfig {
            url: self.ws_url.clone(),
            buffer: self.event_buffer,
        }
    }

    /// Open the persisted credential pair at the configured location.
    pub fn open_credentials(&self) -> Result<FileCredentials, StoreError> {
        match &self.credentials_path {
            Some(path) => FileCredentials::open_at(path),
            None => FileCredentials::open_default(),
        }
    }
}
