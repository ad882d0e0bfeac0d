//! Adapter for every provider that speaks the OpenAI chat-completions wire
//! shape: the built-in `cerebras`, `openai`, `qwen`, and `local` types, plus
//! the alias types (`xai`, `fireworks`, `deepseek`, `mistral`) which differ
//! only in default base URL and default model.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

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

/// Provider adapter for any OpenAI-compatible chat-completions endpoint
pub struct OpenAiCompatibleProvider {
    name: String,
    provider_type: String,
    http: HttpHelper,
    api_keys: Vec<String>,
    key_cursor: AtomicUsize,
    models: Vec<String>,
    default_model: String,
    local: bool,
    extra_headers: Vec<(String, String)>,
    metrics: Arc<MetricsTracker>,
}

impl OpenAiCompatibleProvider {
    /// Build an adapter from provider config, defaulting the base URL when unset
    pub fn new(
        name: impl Into<String>,
        provider_type: impl Into<String>,
        config: &ProviderConfig,
        default_base_url: &str,
        metrics: Arc<MetricsTracker>,
    ) -> Result<Self> {
        Self::with_headers(name, provider_type, config, default_base_url, Vec::new(), metrics)
    }

    /// Build an adapter that also sends `extra_headers` on every request
    /// (OpenRouter's required attribution headers, for instance)
    pub fn with_headers(
        name: impl Into<String>,
        provider_type: impl Into<String>,
        config: &ProviderConfig,
        default_base_url: &str,
        extra_headers: Vec<(String, String)>,
        metrics: Arc<MetricsTracker>,
    ) -> Result<Self> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url.to_string());
        let http = HttpHelper::new(base_url, std::time::Duration::from_secs(60))?;

        Ok(Self {
            name: name.into(),
            provider_type: provider_type.into(),
            http,
            api_keys: config.api_keys.clone(),
            key_cursor: AtomicUsize::new(0),
            models: config.model_candidates(),
            default_model: config.default_model.clone(),
            local: config.local,
            extra_headers,
            metrics,
        })
    }

    fn next_key(&self) -> Option<String> {
        if self.api_keys.is_empty() {
            return None;
        }
        let idx = self.key_cursor.fetch_add(1, Ordering::Relaxed) % self.api_keys.len();
        Some(self.api_keys[idx].clone())
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// Split a growing SSE byte buffer into complete `data: ...` lines
fn drain_sse_lines(buf: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.find('\n') {
        let line = buf[..pos].trim_end_matches('\r').to_string();
        *buf = buf[pos + 1..].to_string();
        if let Some(data) = line.strip_prefix("data:") {
            lines.push(data.trim().to_string());
        }
    }
    lines
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> &str {
        &self.provider_type
    }

    fn list_models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_authenticated(&self) -> bool {
        self.local || !self.api_keys.is_empty()
    }

    async fn generate_chat_completion(&self, request: &GenerationRequest) -> Result<ChatStream> {
        let mut messages = Vec::new();
        if let Some(context) = &request.context {
            messages.push(json!({"role": "system", "content": context}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let body = json!({
            "model": request.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        let mut builder = self.http.client().post(self.http.url("/chat/completions")).json(&body);
        if let Some(key) = self.next_key() {
            builder = builder.bearer_auth(key);
        }
        for (header, value) in &self.extra_headers {
            builder = builder.header(header, value);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::Transport(super::http::redact_status(status)));
        }

        let mut byte_stream = response.bytes_stream();
        let stream = try_stream! {
            let mut buf = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let bytes = chunk.map_err(Error::from)?;
                buf.push_str(&String::from_utf8_lossy(&bytes));

                for line in drain_sse_lines(&mut buf) {
                    if line == "[DONE]" {
                        yield ChatChunk { content: String::new(), done: true, usage: None };
                        continue;
                    }
                    if line.is_empty() {
                        continue;
                    }
                    let parsed: StreamChunk = serde_json::from_str(&line).map_err(Error::from)?;
                    let usage = parsed.usage.map(Usage::from);
                    let Some(choice) = parsed.choices.into_iter().next() else { continue };
                    let done = choice.finish_reason.is_some();
                    yield ChatChunk {
                        content: choice.delta.content.unwrap_or_default(),
                        done,
                        usage,
                    };
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<()> {
        let mut builder = self.http.client().get(self.http.url("/models"));
        if let Some(key) = self.next_key() {
            builder = builder.bearer_auth(key);
        }
        for (header, value) in &self.extra_headers {
            builder = builder.header(header, value);
        }
        let response = builder.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Transport(super::http::redact_status(response.status())))
        }
    }

    fn supports_tools(&self) -> bool {
        true
    }

    fn get_metrics(&self) -> Option<ProviderMetricsSnapshot> {
        Some(self.metrics.provider_row(&self.name).snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_draining_extracts_data_payloads() {
        let mut buf = "data: {\"a\":1}\n\ndata: [DONE]\n\n".to_string();
        let lines = drain_sse_lines(&mut buf);
        assert_eq!(lines, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn key_rotation_cycles_through_all_keys() {
        let metrics = Arc::new(MetricsTracker::new());
        let config = ProviderConfig {
            api_keys: vec!["k1".to_string(), "k2".to_string()],
            ..ProviderConfig::default()
        };
        let provider =
            OpenAiCompatibleProvider::new("cerebras", "cerebras", &config, "https://api.cerebras.ai/v1", metrics)
                .unwrap();
        let first = provider.next_key().unwrap();
        let second = provider.next_key().unwrap();
        let third = provider.next_key().unwrap();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }
}
