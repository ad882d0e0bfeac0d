//! Google Gemini adapter: API key as a query parameter, `contents[].parts[]`
//! request shape, `candidates[].content.parts[].text` response shape.

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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Provider adapter for Google's Gemini `generateContent` API
pub struct GeminiProvider {
    name: String,
    http: HttpHelper,
    api_key: Option<String>,
    models: Vec<String>,
    default_model: String,
    metrics: Arc<MetricsTracker>,
}

impl GeminiProvider {
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
            metrics,
        })
    }
}

#[derive(Deserialize, Default)]
struct GenerateContentChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize, Default)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize, Default)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u64,
}

impl From<GeminiUsage> for Usage {
    fn from(u: GeminiUsage) -> Self {
        Self {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }
    }
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
impl Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> &str {
        "gemini"
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

        let mut contents = Vec::new();
        if let Some(context) = &request.context {
            contents.push(json!({"role": "user", "parts": [{"text": context}]}));
        }
        contents.push(json!({"role": "user", "parts": [{"text": request.prompt}]}));
        let body = json!({"contents": contents});

        let url = format!(
            "{}?key={api_key}&alt=sse",
            self.http.url(&format!("/models/{}:streamGenerateContent", request.model))
        );

        let response = self.http.client().post(url).json(&body).send().await?;
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

                for line in drain_sse_data_lines(&mut buf) {
                    let parsed: GenerateContentChunk = serde_json::from_str(&line).map_err(Error::from)?;
                    let usage = parsed.usage_metadata.map(Usage::from);
                    let Some(candidate) = parsed.candidates.into_iter().next() else { continue };
                    let text: String = candidate.content.parts.into_iter().map(|p| p.text).collect();
                    let done = candidate.finish_reason.is_some();
                    yield ChatChunk { content: text, done, usage };
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<()> {
        let Some(api_key) = self.api_key.clone() else {
            return Err(Error::Auth(format!("{} has no configured API key", self.name)));
        };
        let url = format!("{}?key={api_key}", self.http.url("/models"));
        let response = self.http.client().get(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Error::Transport(super::http::redact_status(response.status())))
        }
    }

    fn tool_format(&self) -> &str {
        "gemini"
    }

    fn get_metrics(&self) -> Option<ProviderMetricsSnapshot> {
        Some(self.metrics.provider_row(&self.name).snapshot())
    }
}
