//! Deterministic test double for [`Provider`]. Lives under `#[cfg(test)]`
//! only and is never registered by [`super::factory::ProviderRegistry`].

use async_trait::async_trait;
use futures::stream;

use crate::Result;
use crate::metrics::ProviderMetricsSnapshot;

use super::{ChatChunk, ChatStream, GenerationRequest, Provider, Usage};

/// Scripted behavior a [`StubProvider`] call replays
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Succeed, yielding `content` as a single chunk then a done marker
    Succeed {
        /// Generated text
        content: String,
        /// Reported usage
        usage: Usage,
    },
    /// Fail every call with this error message
    Fail(String),
}

/// Configurable fake provider for router/dispatcher tests
pub struct StubProvider {
    name: String,
    authenticated: bool,
    behavior: StubBehavior,
    models: Vec<String>,
}

impl StubProvider {
    /// Build a stub that always succeeds with `content`
    #[must_use]
    pub fn succeeding(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authenticated: true,
            behavior: StubBehavior::Succeed {
                content: content.into(),
                usage: Usage {
                    prompt_tokens: 5,
                    completion_tokens: 5,
                    total_tokens: 10,
                },
            },
            models: vec!["stub-model".to_string()],
        }
    }

    /// Build a stub that always fails with `message`
    #[must_use]
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            authenticated: true,
            behavior: StubBehavior::Fail(message.into()),
            models: vec!["stub-model".to_string()],
        }
    }

    /// Mark this stub as lacking credentials
    #[must_use]
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider_type(&self) -> &str {
        "stub"
    }

    fn list_models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn default_model(&self) -> String {
        self.models.first().cloned().unwrap_or_default()
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    async fn generate_chat_completion(&self, _request: &GenerationRequest) -> Result<ChatStream> {
        match &self.behavior {
            StubBehavior::Succeed { content, usage } => {
                let chunks = vec![
                    Ok(ChatChunk {
                        content: content.clone(),
                        done: false,
                        usage: None,
                    }),
                    Ok(ChatChunk {
                        content: String::new(),
                        done: true,
                        usage: Some(*usage),
                    }),
                ];
                Ok(Box::pin(stream::iter(chunks)))
            }
            StubBehavior::Fail(message) => Err(crate::Error::Transport(message.clone())),
        }
    }

    async fn health_check(&self) -> Result<()> {
        match &self.behavior {
            StubBehavior::Succeed { .. } => Ok(()),
            StubBehavior::Fail(message) => Err(crate::Error::Transport(message.clone())),
        }
    }

    fn get_metrics(&self) -> Option<ProviderMetricsSnapshot> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::collect_chat_completion;

    #[tokio::test]
    async fn succeeding_stub_collects_its_content() {
        let stub = StubProvider::succeeding("stub-a", "fn main() {}");
        let stream = stub
            .generate_chat_completion(&GenerationRequest::default())
            .await
            .unwrap();
        let result = collect_chat_completion(stream).await.unwrap();
        assert_eq!(result.code, "fn main() {}");
        assert_eq!(result.usage.total_tokens, 10);
    }

    #[tokio::test]
    async fn failing_stub_errors() {
        let stub = StubProvider::failing("stub-b", "boom");
        let stream = stub
            .generate_chat_completion(&GenerationRequest::default())
            .await;
        assert!(stream.is_err());
    }
}
