//! Provider capability contract, registry, and built-in adapters.
//!
//! A provider is whatever value supplies the [`Provider`] operation set; there
//! is no shared base class. Common behavior (HTTP client construction, auth
//! headers) lives in [`http::HttpHelper`] and is held by each adapter that
//! needs it, not inherited.

mod anthropic;
mod factory;
mod gemini;
mod http;
mod openai_compatible;
mod openrouter;

#[cfg(test)]
pub mod stub;

pub use factory::ProviderRegistry;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::metrics::ProviderMetricsSnapshot;

/// Token usage reported by a provider alongside generated code
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens consumed
    pub prompt_tokens: u64,
    /// Completion tokens produced
    pub completion_tokens: u64,
    /// Sum of prompt and completion tokens
    pub total_tokens: u64,
}

/// A single streamed chunk of a chat completion
#[derive(Debug, Clone, Default)]
pub struct ChatChunk {
    /// Incremental text content
    pub content: String,
    /// Whether this is the final chunk
    pub done: bool,
    /// Usage, populated on the final chunk when the provider reports it
    pub usage: Option<Usage>,
}

/// A boxed stream of chat chunks; the router assembles the full text by
/// concatenation (the external tool contract is non-streaming, per design).
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatChunk>> + Send>>;

/// Assembled request context passed to a provider
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    /// Natural-language instruction
    pub prompt: String,
    /// Assembled context (concatenated context file contents)
    pub context: Option<String>,
    /// Optional language hint
    pub language_hint: Option<String>,
    /// Model to use for this call (chosen by the model selector)
    pub model: String,
}

/// The full generated artifact, always produced by a successful provider call
#[derive(Debug, Clone)]
pub struct CodeGenerationResult {
    /// Generated code
    pub code: String,
    /// Token usage
    pub usage: Usage,
}

/// Capability set every provider adapter must supply (§4.3)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider instance name (matches its config key)
    fn name(&self) -> &str;

    /// Provider type identifier (`cerebras`, `openai`, `anthropic`, ...)
    fn provider_type(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str {
        ""
    }

    /// Candidate models this provider can serve
    fn list_models(&self) -> Vec<String>;

    /// Default model when no candidate list is configured
    fn default_model(&self) -> String;

    /// Validate/refresh credentials; no-op for key-based providers
    async fn authenticate(&self) -> Result<()> {
        Ok(())
    }

    /// Whether this provider currently has usable credentials
    fn is_authenticated(&self) -> bool;

    /// Drop cached credentials
    async fn logout(&self) {}

    /// Stream a chat completion for `request`
    async fn generate_chat_completion(&self, request: &GenerationRequest) -> Result<ChatStream>;

    /// Lightweight liveness probe used by the health monitor
    async fn health_check(&self) -> Result<()>;

    /// Whether this provider supports tool-calling
    fn supports_tools(&self) -> bool {
        false
    }

    /// Whether this provider supports streaming responses
    fn supports_streaming(&self) -> bool {
        true
    }

    /// Whether this provider exposes an OpenAI-style Responses API
    fn supports_responses_api(&self) -> bool {
        false
    }

    /// Wire format family this adapter speaks (`openai`, `anthropic`, `gemini`)
    fn tool_format(&self) -> &str {
        "openai"
    }

    /// This provider's own metrics snapshot (aggregate row)
    fn get_metrics(&self) -> Option<ProviderMetricsSnapshot>;
}

/// Collapse a [`ChatStream`] into a single [`CodeGenerationResult`].
///
/// The external tool contract is non-streaming (design note: "streaming
/// providers collapsed to strings"); adapters may still stream internally
/// for TTFT metrics.
pub async fn collect_chat_completion(mut stream: ChatStream) -> Result<CodeGenerationResult> {
    use futures::StreamExt;

    let mut code = String::new();
    let mut usage = Usage::default();
    let mut saw_content = false;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if !chunk.content.is_empty() {
            saw_content = true;
            code.push_str(&chunk.content);
        }
        if let Some(u) = chunk.usage {
            usage = u;
        }
    }

    if !saw_content || code.trim().is_empty() {
        return Err(crate::Error::Content(
            "provider returned empty content".to_string(),
        ));
    }

    Ok(CodeGenerationResult { code, usage })
}
