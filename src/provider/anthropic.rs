//! Anthropic Messages API adapter: `x-api-key`/`anthropic-version` headers,
//! top-level `system` field, and `content_block_delta` SSE events rather than
//! the OpenAI-compatible `choices[].delta` shape.

use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::config::ProviderConfig;
use crate::metrics::{MetricsTracker, ProviderMetricsSnapshot};
use crate::{Error, Result};

use super::http::HttpHelper;
use super::{ChatChunk, ChatStream, GenerationRequest, Provider, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Provider adapter for Anthropic's Messages API
pub struct AnthropicProvider {
    name: String,
    http: HttpHelper,
    api_key: Option<String>,
    models: Vec<String>,
    default_model: String,
    max_tokens: u32,
    metrics: Arc<MetricsTracker>,
}

impl AnthropicProvider {
    /// Build an adapter from provider config
    pub fn new(
        name: impl Into<String>,
        config: &ProviderConfig,
        metrics: Arc<MetricsTracker>,
    ) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let http = HttpHelper::new(base_url, std::time::Duration::from_secs(60))?;

        Ok(Self {
            name: name.into(),
            http,
            api_key: config.api_keys.first().cloned(),
            models: config.model_candidates(),
            default_model: config.default_model.clone(),
            max_tokens: config.max_tokens,
            metrics,
        })
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum SseEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: ContentDelta },
    #[serde(rename = "message_delta")]
    MessageDelta {
        #[serde(default)]
        usage: Option<AnthropicUsage>,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ContentDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn drain_sse_data_lines(buf: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.find('\n') {
        let line = buf[..pos].trim_end_matches('\r').to_string();
        *buf = buf[pos + 1..].to_string();
        if let Some(data) = line.strip_prefix("data:") {
            let trimmed = data.trim().to_string();
            if !trimmed.is_empty() {
                lines.push(trimmed);
            }
        }
    }
    lines
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> &str {
        "anthropic"
    }

    fn list_models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_authenticated(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate_chat_completion(&self, request: &GenerationRequest) -> Result<ChatStream> {
        let Some(api_key) = self.api_key.clone() else {
            return Err(Error::Auth(format!("{} has no configured API key", self.name)));
        };

        let mut body = json!({
            "model": request.model,
            "max_tokens": self.max_tokens,
            "stream": true,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(context) = &request.context {
            body["system"] = json!(context);
        }

        let response = self
            .http
            .client()
            .post(self.http.url("/messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Transport(super::http::redact_status(status)));
        }

        let mut byte_stream = response.bytes_stream();
        let stream = try_stream! {
            let mut buf = String::new();
            let mut usage = Usage::default();
            while let Some(chunk) = byte_stream.next().await {
                let bytes = chunk.map_err(Error::from)?;
                buf.push_str(&String::from_utf8_lossy(&bytes));

                for line in drain_sse_data_lines(&mut buf) {
                    let Ok(event) = serde_json::from_str::<SseEvent>(&line) else { continue };
                    match event {
                        SseEvent::ContentBlockDelta { delta } => {
                            yield ChatChunk {
                                content: delta.text.unwrap_or_default(),
                                done: false,
                                usage: None,
                            };
                        }
                        SseEvent::MessageDelta { usage: Some(u) } => {
                            usage.completion_tokens = u.output_tokens;
                            usage.prompt_tokens = u.input_tokens;
                            usage.total_tokens = u.input_tokens + u.output_tokens;
                        }
                        SseEvent::MessageStop => {
                            yield ChatChunk { content: String::new(), done: true, usage: Some(usage) };
                        }
                        _ => {}
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(Error::Auth(format!("{} has no configured API key", self.name)));
        }
        let response = self
            .http
            .client()
            .post(self.http.url("/messages"))
            .header("x-api-key", self.api_key.clone().unwrap_or_default())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": self.default_model,
                "max_tokens": 1,
                "messages": [{"role": "user", "content": "ping"}],
            }))
            .send()
            .await?;
        if response.status().is_success() || response.status().as_u16() == 400 {
            Ok(())
        } else {
            Err(Error::Transport(super::http::redact_status(response.status())))
        }
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn tool_format(&self) -> &str {
        "anthropic"
    }

    fn get_metrics(&self) -> Option<ProviderMetricsSnapshot> {
        Some(self.metrics.provider_row(&self.name).snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_data_lines_skip_blank_separators() {
        let mut buf = "data: {\"type\":\"message_stop\"}\n\n".to_string();
        let lines = drain_sse_data_lines(&mut buf);
        assert_eq!(lines, vec!["{\"type\":\"message_stop\"}".to_string()]);
    }

    #[test]
    fn unauthenticated_without_api_key() {
        let metrics = Arc::new(MetricsTracker::new());
        let config = ProviderConfig::default();
        let provider = AnthropicProvider::new("anthropic", &config, metrics).unwrap();
        assert!(!provider.is_authenticated());
    }
}
