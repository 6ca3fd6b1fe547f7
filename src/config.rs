//! Client configuration

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::{NebulaError, Result};

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.nebulacloud.app";

/// Default request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const API_KEY_ENV: &str = "NEBULA_API_KEY";
pub const BASE_URL_ENV: &str = "NEBULA_BASE_URL";
pub const TIMEOUT_ENV: &str = "NEBULA_TIMEOUT_SECS";

/// Connection settings shared by the async and blocking clients
#[derive(Debug)]
pub struct ClientConfig {
    api_key: SecretString,
    /// Base URL without a trailing slash
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    /// Create a config for the given credential with default endpoint and timeout
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(NebulaError::client(format!(
                "API key is required. Pass it explicitly or set the {} environment variable.",
                API_KEY_ENV
            )));
        }

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Create config from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV).unwrap_or_default();
        let mut config = Self::new(api_key)?;

        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            if !base_url.trim().is_empty() {
                config = config.with_base_url(base_url);
            }
        }

        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                NebulaError::client(format!("{} must be a whole number of seconds", TIMEOUT_ENV))
            })?;
            config = config.with_timeout(Duration::from_secs(secs));
        }

        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Join an endpoint path onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}
