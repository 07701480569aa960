// HttpClientFactory: builds the reqwest client used for artifact downloads.
// Proxy settings come from the standard HTTP(S)_PROXY / NO_PROXY variables,
// which reqwest honours on its own.

use crate::constants::env_vars;

use anyhow::{Context, Result};
use reqwest::Client;
use runserver_sdk::HarnessPackage;
use std::time::Duration;

/// Creates HTTP clients for the harness.
pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Default whole-request timeout in seconds. Server runtimes are large.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
    pub const MIN_TIMEOUT_SECS: u64 = 30;
    pub const MAX_TIMEOUT_SECS: u64 = 3600;

    /// Parse a timeout override, clamping it to the allowed range.
    ///
    /// Unset or unparsable values fall back to [`Self::DEFAULT_TIMEOUT_SECS`].
    pub fn timeout_from(raw: Option<&str>) -> Duration {
        let secs = raw
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECS);
        Duration::from_secs(secs.clamp(Self::MIN_TIMEOUT_SECS, Self::MAX_TIMEOUT_SECS))
    }

    /// Read the timeout from `RUNSERVER_HTTP_TIMEOUT`.
    pub fn get_timeout() -> Duration {
        Self::timeout_from(std::env::var(env_vars::HTTP_TIMEOUT).ok().as_deref())
    }

    /// Create a client with the harness user agent and timeouts.
    pub fn create_client() -> Result<Client> {
        Client::builder()
            .timeout(Self::get_timeout())
            .connect_timeout(Duration::from_secs(30))
            .user_agent(HarnessPackage::user_agent())
            .build()
            .context("Failed to build HTTP client")
    }
}
