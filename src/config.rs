//! Configuration management
//!
//! Layers a YAML file over `MCP_CODE_API_`-prefixed environment variables via
//! figment, then applies `<PROVIDER>_API_KEY` overrides and `${VAR}` expansion.

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Root configuration document
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Env files to load before processing config, `~` expansion supported
    pub env_files: Vec<String>,
    /// Provider configurations keyed by provider type (`cerebras`, `openai`, ...)
    pub providers: HashMap<String, ProviderConfig>,
    /// Server identity reported in `initialize`
    pub server: ServerInfoConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Metrics HTTP endpoint configuration
    pub metrics: MetricsEndpointConfig,
    /// Router / selection strategy configuration
    pub router: RouterConfig,
}

impl AppConfig {
    /// Load configuration from file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        } else if let Some(default_path) = Self::default_config_path() {
            if default_path.exists() {
                figment = figment.merge(Yaml::file(&default_path));
            }
        }

        figment = figment.merge(Env::prefixed("MCP_CODE_API_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.apply_api_key_env_overrides();
        config.expand_env_vars();

        Ok(config)
    }

    /// Default config path: `~/.cerebras-mcp.yaml`
    #[must_use]
    pub fn default_config_path() -> Option<std::path::PathBuf> {
        dirs::home_dir().map(|home| home.join(".cerebras-mcp.yaml"))
    }

    /// Load environment files into the process environment.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = Self::expand_tilde(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    fn expand_tilde(path_str: &str) -> String {
        if let Some(rest) = path_str.strip_prefix('~') {
            if let Some(home) = dirs::home_dir() {
                return format!("{}{rest}", home.display());
            }
        }
        path_str.to_string()
    }

    /// `<PROVIDER>_API_KEY` env vars override/seed a provider's key list.
    ///
    /// Applied after the base config is loaded but before `${VAR}` expansion,
    /// per the externally documented override order.
    fn apply_api_key_env_overrides(&mut self) {
        for (name, provider) in &mut self.providers {
            let var_name = format!("{}_API_KEY", name.to_uppercase());
            if let Ok(key) = env::var(&var_name) {
                if !key.is_empty() {
                    provider.api_keys = vec![key];
                }
            }
        }
    }

    /// Expand `${VAR}` / `${VAR:-default}` in provider base URLs.
    fn expand_env_vars(&mut self) {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("valid regex");
        for provider in self.providers.values_mut() {
            provider.base_url = provider
                .base_url
                .as_ref()
                .map(|v| Self::expand_string(&re, v));
        }
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures<'_>| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Providers whose config is present and have at least one configured credential
    pub fn authenticated_providers(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.providers.iter().filter(|(_, p)| p.has_credentials())
    }
}

/// Per-provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Human-readable display name
    pub display_name: String,
    /// API keys; more than one enables round-robin load balancing at the HTTP layer
    pub api_keys: Vec<String>,
    /// Optional OAuth token bundle (contract only; dance internals are external)
    pub oauth: Option<OAuthBundle>,
    /// Default model used when no candidate list is configured
    pub default_model: String,
    /// Candidate model list consulted by the model selector
    pub models: Vec<String>,
    /// Base URL; required for local providers, optional (defaulted per adapter) for remote ones
    pub base_url: Option<String>,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Maximum concurrent in-flight calls to this provider
    pub concurrency: usize,
    /// Model-selector strategy for this provider: failover, round-robin, random
    pub model_strategy: String,
    /// Whether this provider is a local (no-auth) inference backend
    pub local: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            api_keys: Vec::new(),
            oauth: None,
            default_model: String::new(),
            models: Vec::new(),
            base_url: None,
            temperature: 0.2,
            max_tokens: 4096,
            concurrency: 4,
            model_strategy: "failover".to_string(),
            local: false,
        }
    }
}

impl ProviderConfig {
    /// Exactly one of {non-empty key list, valid OAuth bundle} is required for
    /// remote providers; local providers only need a base URL.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        if self.local {
            return self.base_url.is_some();
        }
        !self.api_keys.is_empty() || self.oauth.as_ref().is_some_and(OAuthBundle::is_valid)
    }

    /// The ordered candidate model list, falling back to the default model alone
    #[must_use]
    pub fn model_candidates(&self) -> Vec<String> {
        if self.models.is_empty() {
            vec![self.default_model.clone()]
        } else {
            self.models.clone()
        }
    }
}

/// OAuth token bundle (contract only; the OAuth dance itself is out of scope)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthBundle {
    /// Access token
    pub access_token: String,
    /// Refresh token
    pub refresh_token: Option<String>,
    /// Unix epoch seconds when `access_token` expires
    pub expires_at: u64,
}

impl OAuthBundle {
    /// Valid if an access token is present and not expired
    #[must_use]
    pub fn is_valid(&self) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.expires_at == 0 || self.expires_at > now
    }
}

/// Server identity reported in `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInfoConfig {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
    /// Short description surfaced in system instructions
    pub description: String,
    /// Overall per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServerInfoConfig {
    fn default() -> Self {
        Self {
            name: "mcp-code-api".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Multi-provider AI code generation over MCP".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Verbose flag (maps to debug-level filtering)
    pub verbose: bool,
    /// Debug flag (maps to trace-level filtering)
    pub debug: bool,
    /// Optional log file path; stderr is used when unset
    pub file: Option<String>,
    /// Emit structured JSON log lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            verbose: false,
            debug: false,
            file: None,
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Effective filter directive, CLI-style flags take precedence over `level`
    #[must_use]
    pub fn effective_level(&self) -> &str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            &self.level
        }
    }
}

/// Metrics HTTP endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsEndpointConfig {
    /// Enable the optional HTTP dashboard/API
    pub enabled: bool,
    /// Host to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
}

impl Default for MetricsEndpointConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 7497,
        }
    }
}

/// Router / selection strategy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Ordered preferred provider list
    pub order: Vec<String>,
    /// Selection strategy: failover, round-robin, random, racing
    pub strategy: String,
    /// Racing subconfig, consulted when `strategy == "racing"`
    pub racing: RacingConfig,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Health monitor thresholds
    pub health: HealthCheckConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            strategy: "failover".to_string(),
            racing: RacingConfig::default(),
            request_timeout: Duration::from_secs(30),
            health: HealthCheckConfig::default(),
        }
    }
}

/// Racing strategy subconfig
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RacingConfig {
    /// `provider:model` entries to race
    pub models: Vec<String>,
    /// Maximum number of racers launched, entries beyond this are truncated
    pub num_racers: usize,
    /// Grace period after the first success, in milliseconds
    pub grace_period_ms: u64,
}

impl Default for RacingConfig {
    fn default() -> Self {
        Self {
            models: Vec::new(),
            num_racers: 3,
            grace_period_ms: 500,
        }
    }
}

/// Health monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable periodic health probes
    pub enabled: bool,
    /// Probe interval
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Per-probe timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Consecutive failures before a provider is marked unhealthy
    pub failure_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            failure_threshold: 3,
        }
    }
}

/// Hand-rolled human-duration serde, matching strings like `"30s"`, `"5m"`, `"100ms"`
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize `Duration` as a `"{secs}s"` string
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize a human-readable duration string (`"30s"`, `"5m"`, `"100ms"`)
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if let Some(secs) = s.strip_suffix("ms") {
            return secs
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom);
        }
        if let Some(secs) = s.strip_suffix('s') {
            return secs
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom);
        }
        if let Some(mins) = s.strip_suffix('m') {
            return mins
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom);
        }
        s.parse::<u64>()
            .map(Duration::from_secs)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_strategy_is_failover() {
        let config = AppConfig::default();
        assert_eq!(config.router.strategy, "failover");
        assert_eq!(config.router.health.failure_threshold, 3);
    }

    #[test]
    fn provider_needs_keys_or_oauth_unless_local() {
        let remote = ProviderConfig::default();
        assert!(!remote.has_credentials());

        let keyed = ProviderConfig {
            api_keys: vec!["sk-test".to_string()],
            ..ProviderConfig::default()
        };
        assert!(keyed.has_credentials());

        let local = ProviderConfig {
            local: true,
            base_url: Some("http://localhost:11434".to_string()),
            ..ProviderConfig::default()
        };
        assert!(local.has_credentials());
    }

    #[test]
    fn model_candidates_falls_back_to_default() {
        let provider = ProviderConfig {
            default_model: "gpt-5".to_string(),
            ..ProviderConfig::default()
        };
        assert_eq!(provider.model_candidates(), vec!["gpt-5".to_string()]);
    }

    #[test]
    #[allow(unsafe_code)]
    fn api_key_env_override_replaces_key_list() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "cerebras".to_string(),
            ProviderConfig {
                api_keys: vec!["old-key".to_string()],
                ..ProviderConfig::default()
            },
        );
        unsafe {
            env::set_var("CEREBRAS_API_KEY", "new-key-from-env");
        }
        config.apply_api_key_env_overrides();
        unsafe {
            env::remove_var("CEREBRAS_API_KEY");
        }
        assert_eq!(
            config.providers["cerebras"].api_keys,
            vec!["new-key-from-env".to_string()]
        );
    }

    #[test]
    fn expand_env_vars_substitutes_base_url() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "local".to_string(),
            ProviderConfig {
                base_url: Some("${LOCAL_HOST:-http://127.0.0.1:8080}".to_string()),
                ..ProviderConfig::default()
            },
        );
        config.expand_env_vars();
        assert_eq!(
            config.providers["local"].base_url,
            Some("http://127.0.0.1:8080".to_string())
        );
    }

    #[test]
    fn duration_roundtrips_through_yaml() {
        let yaml = "request_timeout: 45s\nstrategy: racing\norder: []\nracing:\n  models: []\n  num_racers: 2\n  grace_period_ms: 250\nhealth:\n  enabled: true\n  interval: 30s\n  timeout: 5s\n  failure_threshold: 3\n";
        let router: RouterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(router.request_timeout, Duration::from_secs(45));
        assert_eq!(router.strategy, "racing");
    }

    #[test]
    fn load_env_files_skips_missing() {
        let config = AppConfig {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        config.load_env_files();
    }
}
