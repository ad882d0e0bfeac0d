//! OpenRouter adapter: the OpenAI-compatible wire shape plus the
//! `HTTP-Referer`/`X-Title` attribution headers OpenRouter's terms of
//! service ask every client to send.

use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::metrics::MetricsTracker;
use crate::Result;

use super::openai_compatible::OpenAiCompatibleProvider;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Build an OpenRouter provider instance, pre-wired with attribution headers
pub fn build(
    name: impl Into<String>,
    config: &ProviderConfig,
    metrics: Arc<MetricsTracker>,
) -> Result<OpenAiCompatibleProvider> {
    OpenAiCompatibleProvider::with_headers(
        name,
        "openrouter",
        config,
        DEFAULT_BASE_URL,
        vec![
            ("HTTP-Referer".to_string(), "https://github.com/mcp-code-api".to_string()),
            ("X-Title".to_string(), "mcp-code-api".to_string()),
        ],
        metrics,
    )
}
