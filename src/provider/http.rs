//! Shared HTTP plumbing held by (not inherited by) OpenAI-compatible,
//! Anthropic, and Gemini adapters.

use std::time::Duration;

use reqwest::Client;

use crate::{Error, Result};

/// Small helper bundling a configured [`reqwest::Client`] and the provider's
/// base URL; each adapter owns one instance rather than sharing a base class.
#[derive(Clone)]
pub struct HttpHelper {
    client: Client,
    base_url: String,
}

impl HttpHelper {
    /// Build a helper with a sane request timeout; honors standard proxy
    /// environment variables via `reqwest`'s default system-proxy detection.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Underlying HTTP client
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Join `path` onto the configured base URL
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Never log or include a key/token in any error; this helper exists so call
/// sites can't accidentally interpolate a secret into a message string.
#[must_use]
pub fn redact_status(status: reqwest::StatusCode) -> String {
    format!("upstream returned HTTP {status}")
}
