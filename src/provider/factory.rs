//! Process-wide provider-type registry: maps a type identifier to a
//! constructor closure, seeded at startup with the built-in types plus the
//! OpenAI-compatible "family alias" types. Unknown types fail `create_provider`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::metrics::MetricsTracker;
use crate::{Error, Result};

use super::anthropic::AnthropicProvider;
use super::gemini::GeminiProvider;
use super::openai_compatible::OpenAiCompatibleProvider;
use super::{openrouter, Provider};

type Constructor = Box<
    dyn Fn(&str, &ProviderConfig, Arc<MetricsTracker>) -> Result<Arc<dyn Provider>> + Send + Sync,
>;

/// Registry of provider-type constructors, populated with built-ins at startup
pub struct ProviderRegistry {
    constructors: HashMap<String, Constructor>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ProviderRegistry {
    /// Empty registry with no constructors
    #[must_use]
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Register or replace the constructor for `provider_type`
    pub fn register(&mut self, provider_type: impl Into<String>, constructor: Constructor) {
        self.constructors.insert(provider_type.into(), constructor);
    }

    /// Registry seeded with every built-in and alias type
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(
            "cerebras",
            Box::new(|name, config, metrics| {
                Ok(Arc::new(OpenAiCompatibleProvider::new(
                    name,
                    "cerebras",
                    config,
                    "https://api.cerebras.ai/v1",
                    metrics,
                )?) as Arc<dyn Provider>)
            }),
        );
        registry.register(
            "openai",
            Box::new(|name, config, metrics| {
                Ok(Arc::new(OpenAiCompatibleProvider::new(
                    name,
                    "openai",
                    config,
                    "https://api.openai.com/v1",
                    metrics,
                )?) as Arc<dyn Provider>)
            }),
        );
        registry.register(
            "qwen",
            Box::new(|name, config, metrics| {
                Ok(Arc::new(OpenAiCompatibleProvider::new(
                    name,
                    "qwen",
                    config,
                    "https://dashscope.aliyuncs.com/compatible-mode/v1",
                    metrics,
                )?) as Arc<dyn Provider>)
            }),
        );
        registry.register(
            "local",
            Box::new(|name, config, metrics| {
                Ok(Arc::new(OpenAiCompatibleProvider::new(
                    name,
                    "local",
                    config,
                    "http://localhost:11434/v1",
                    metrics,
                )?) as Arc<dyn Provider>)
            }),
        );
        registry.register(
            "anthropic",
            Box::new(|name, config, metrics| {
                Ok(Arc::new(AnthropicProvider::new(name, config, metrics)?) as Arc<dyn Provider>)
            }),
        );
        registry.register(
            "gemini",
            Box::new(|name, config, metrics| {
                Ok(Arc::new(GeminiProvider::new(name, config, metrics)?) as Arc<dyn Provider>)
            }),
        );
        registry.register(
            "openrouter",
            Box::new(|name, config, metrics| {
                Ok(Arc::new(openrouter::build(name, config, metrics)?) as Arc<dyn Provider>)
            }),
        );

        for (alias, default_base_url) in [
            ("xai", "https://api.x.ai/v1"),
            ("fireworks", "https://api.fireworks.ai/inference/v1"),
            ("deepseek", "https://api.deepseek.com/v1"),
            ("mistral", "https://api.mistral.ai/v1"),
        ] {
            let provider_type = alias.to_string();
            let base_url = default_base_url.to_string();
            registry.register(
                alias,
                Box::new(move |name, config, metrics| {
                    Ok(Arc::new(OpenAiCompatibleProvider::new(
                        name,
                        provider_type.clone(),
                        config,
                        &base_url,
                        metrics,
                    )?) as Arc<dyn Provider>)
                }),
            );
        }

        registry
    }

    /// Construct a provider instance of `provider_type`
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownProviderType`] when no constructor is registered.
    pub fn create_provider(
        &self,
        provider_type: &str,
        name: &str,
        config: &ProviderConfig,
        metrics: Arc<MetricsTracker>,
    ) -> Result<Arc<dyn Provider>> {
        let constructor = self
            .constructors
            .get(provider_type)
            .ok_or_else(|| Error::UnknownProviderType(provider_type.to_string()))?;
        constructor(name, config, metrics)
    }

    /// Registered provider-type identifiers
    #[must_use]
    pub fn known_types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_every_documented_type() {
        let registry = ProviderRegistry::with_builtins();
        for expected in [
            "cerebras", "openai", "qwen", "local", "anthropic", "gemini", "openrouter", "xai",
            "fireworks", "deepseek", "mistral",
        ] {
            assert!(
                registry.known_types().contains(&expected),
                "missing provider type: {expected}"
            );
        }
    }

    #[test]
    fn unknown_type_fails() {
        let registry = ProviderRegistry::with_builtins();
        let metrics = Arc::new(MetricsTracker::new());
        let result = registry.create_provider("does-not-exist", "x", &ProviderConfig::default(), metrics);
        match result {
            Err(err) => assert!(matches!(err, Error::UnknownProviderType(_))),
            Ok(_) => panic!("expected UnknownProviderType error"),
        }
    }

    #[test]
    fn creates_a_built_in_cerebras_provider() {
        let registry = ProviderRegistry::with_builtins();
        let metrics = Arc::new(MetricsTracker::new());
        let provider = registry
            .create_provider("cerebras", "cerebras", &ProviderConfig::default(), metrics)
            .unwrap();
        assert_eq!(provider.provider_type(), "cerebras");
    }
}
