//! Multi-provider completion routing (§4.4): selection, per-attempt
//! execution, and fallback across providers; delegates to [`racing`] when
//! the configured strategy is `racing`.

pub mod model_selector;
pub mod racing;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::AppConfig;
use crate::health::HealthMonitor;
use crate::metrics::MetricsTracker;
use crate::provider::{collect_chat_completion, GenerationRequest, Provider, Usage};
use crate::random::RandomSource;
use crate::retry::{self, RetryPolicy};
use crate::{Error, Result};

use model_selector::{ModelSelector, ModelStrategy};

/// Top-level provider-selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterStrategy {
    /// Walk the preferred list in order, falling back on failure
    Failover,
    /// Rotate which provider goes first, then fall back in preferred order
    RoundRobin,
    /// Pick the first provider uniformly, then fall back in preferred order
    Random,
    /// Race multiple `provider:model` entries in parallel (§4.5)
    Racing,
}

impl RouterStrategy {
    fn parse(s: &str) -> Self {
        match s {
            "round-robin" => Self::RoundRobin,
            "random" => Self::Random,
            "racing" => Self::Racing,
            _ => Self::Failover,
        }
    }
}

/// The outcome of a successful routed generation
#[derive(Debug, Clone)]
pub struct RouteResult {
    /// Generated code
    pub code: String,
    /// Token usage reported by the winning provider
    pub usage: Usage,
    /// `provider` or `provider/model` identifying who produced the result
    pub provider_model: String,
}

/// Routes a [`GenerationRequest`] across configured providers
pub struct Router {
    providers: HashMap<String, Arc<dyn Provider>>,
    order: Vec<String>,
    strategy: RouterStrategy,
    model_selectors: HashMap<String, ModelSelector>,
    health: Arc<HealthMonitor>,
    metrics: Arc<MetricsTracker>,
    racing_entries: Vec<String>,
    num_racers: usize,
    grace_period: Duration,
    request_timeout: Duration,
    round_robin_cursor: AtomicUsize,
    random: Arc<dyn RandomSource>,
}

impl Router {
    /// Build a router from app config, the constructed provider set, and shared trackers
    #[must_use]
    pub fn new(
        config: &AppConfig,
        providers: HashMap<String, Arc<dyn Provider>>,
        metrics: Arc<MetricsTracker>,
        health: Arc<HealthMonitor>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let mut model_selectors = HashMap::new();
        for (name, provider_config) in &config.providers {
            let strategy = ModelStrategy::parse(&provider_config.model_strategy);
            model_selectors.insert(
                name.clone(),
                ModelSelector::new(strategy, provider_config.model_candidates(), random.clone()),
            );
        }

        let order = if config.router.order.is_empty() {
            providers.keys().cloned().collect()
        } else {
            config.router.order.clone()
        };

        Self {
            providers,
            order,
            strategy: RouterStrategy::parse(&config.router.strategy),
            model_selectors,
            health,
            metrics,
            racing_entries: config.router.racing.models.clone(),
            num_racers: config.router.racing.num_racers,
            grace_period: Duration::from_millis(config.router.racing.grace_period_ms),
            request_timeout: config.router.request_timeout,
            round_robin_cursor: AtomicUsize::new(0),
            random,
        }
    }

    fn eligible_providers(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| {
                self.providers
                    .get(*name)
                    .is_some_and(|p| p.is_authenticated())
            })
            .cloned()
            .collect()
    }

    fn attempt_order(&self) -> Vec<String> {
        let eligible = self.eligible_providers();

        let healthy: Vec<String> = eligible
            .iter()
            .filter(|name| self.health.tracker(name).is_healthy())
            .cloned()
            .collect();

        let mut candidates = if healthy.is_empty() { eligible } else { healthy };

        match self.strategy {
            RouterStrategy::RoundRobin if !candidates.is_empty() => {
                let idx = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
                let chosen = candidates.remove(idx);
                candidates.insert(0, chosen);
            }
            RouterStrategy::Random if !candidates.is_empty() => {
                let idx = self.random.pick_index(candidates.len());
                let chosen = candidates.remove(idx);
                candidates.insert(0, chosen);
            }
            _ => {}
        }

        candidates
    }

    /// Route `request` to a provider, falling back across the configured list on failure.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllProvidersFailed`] naming every attempted provider's
    /// failure, or [`Error::Cancelled`] if the request is cancelled mid-flight.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<RouteResult> {
        if self.strategy == RouterStrategy::Racing {
            return self.generate_racing(request, cancel).await;
        }

        let attempt_order = self.attempt_order();
        if attempt_order.is_empty() {
            return Err(Error::AllProvidersFailed(
                "no authenticated provider is configured".to_string(),
            ));
        }

        let mut failures = Vec::new();

        for (attempt_index, name) in attempt_order.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let provider = self.providers[name].clone();
            let model = self
                .model_selectors
                .get(name)
                .map_or_else(|| provider.default_model(), ModelSelector::select);

            let mut attempt_request = request.clone();
            attempt_request.model = model.clone();

            let request_timeout = self.request_timeout;
            let retry_policy = RetryPolicy::default();
            let start = Instant::now();
            let collected = retry::with_retry(&retry_policy, name, || {
                let provider = provider.clone();
                let attempt_request = attempt_request.clone();
                async move {
                    let outcome = tokio::time::timeout(
                        request_timeout,
                        provider.generate_chat_completion(&attempt_request),
                    )
                    .await;

                    match outcome {
                        Ok(Ok(stream)) => collect_chat_completion(stream).await,
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(Error::Transport(format!("{name} timed out"))),
                    }
                }
            })
            .await;

            match collected {
                Ok(result) => {
                    let latency = start.elapsed();
                    self.metrics
                        .record_completion(name, &model, latency, &Ok(result.usage));
                    self.health.tracker(name).record_success();
                    if attempt_index > 0 {
                        self.metrics.record_fallback_attempt();
                    }
                    return Ok(RouteResult {
                        code: result.code,
                        usage: result.usage,
                        provider_model: format!("{name}/{model}"),
                    });
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(provider = %name, model = %model, error = %e, "provider attempt failed");
                    if let Some(selector) = self.model_selectors.get(name) {
                        selector.record_failure(&model);
                    }
                    self.health.tracker(name).record_failure(e.to_string());
                    self.metrics.record_completion(name, &model, start.elapsed(), &Err(()));
                    failures.push(format!("{name}: {e}"));
                }
            }
        }

        Err(Error::AllProvidersFailed(failures.join("; ")))
    }

    async fn generate_racing(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<RouteResult> {
        let outcome = racing::race(
            &self.racing_entries,
            self.num_racers,
            self.grace_period,
            request,
            &self.providers,
            &self.metrics,
            cancel,
        )
        .await?;

        for late in &outcome.late_completions {
            self.metrics.record_completion(
                &late.provider,
                &late.model,
                late.latency,
                &Ok(late.result.usage),
            );
        }

        let winner = outcome.winner;
        self.metrics.record_completion(
            &winner.provider,
            &winner.model,
            winner.latency,
            &Ok(winner.result.usage),
        );
        self.health.tracker(&winner.provider).record_success();

        Ok(RouteResult {
            code: winner.result.code,
            usage: winner.result.usage,
            provider_model: format!("{}/{}", winner.provider, winner.model),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::provider::stub::StubProvider;
    use crate::random::FixedRandomSource;

    fn app_config(order: Vec<&str>, strategy: &str) -> AppConfig {
        let mut config = AppConfig::default();
        for name in &order {
            config.providers.insert((*name).to_string(), ProviderConfig {
                api_keys: vec!["k".to_string()],
                default_model: "m".to_string(),
                ..ProviderConfig::default()
            });
        }
        config.router.order = order.into_iter().map(str::to_string).collect();
        config.router.strategy = strategy.to_string();
        config
    }

    fn build_router(providers: Vec<Arc<dyn Provider>>, strategy: &str) -> Router {
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        let config = app_config(names, strategy);
        let provider_map = providers.into_iter().map(|p| (p.name().to_string(), p)).collect();
        Router::new(
            &config,
            provider_map,
            Arc::new(MetricsTracker::new()),
            Arc::new(HealthMonitor::new(3)),
            Arc::new(FixedRandomSource(0)),
        )
    }

    #[tokio::test]
    async fn falls_back_to_the_second_provider_on_failure() {
        let p1: Arc<dyn Provider> = Arc::new(StubProvider::failing("p1", "boom"));
        let p2: Arc<dyn Provider> = Arc::new(StubProvider::succeeding("p2", "X"));
        let router = build_router(vec![p1, p2], "failover");

        let result = router
            .generate(&GenerationRequest::default(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.code, "X");
        assert!(result.provider_model.starts_with("p2"));
    }

    #[tokio::test]
    async fn all_providers_failing_names_each_one() {
        let p1: Arc<dyn Provider> = Arc::new(StubProvider::failing("p1", "boom-1"));
        let p2: Arc<dyn Provider> = Arc::new(StubProvider::failing("p2", "boom-2"));
        let router = build_router(vec![p1, p2], "failover");

        let err = router
            .generate(&GenerationRequest::default(), CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::AllProvidersFailed(msg) => {
                assert!(msg.contains("boom-1"));
                assert!(msg.contains("boom-2"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthenticated_providers_are_skipped() {
        let p1: Arc<dyn Provider> = Arc::new(StubProvider::succeeding("p1", "X").unauthenticated());
        let router = build_router(vec![p1], "failover");

        let err = router
            .generate(&GenerationRequest::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllProvidersFailed(_)));
    }

    fn stub_providers(names: &[&str]) -> Vec<Arc<dyn Provider>> {
        names
            .iter()
            .map(|n| Arc::new(StubProvider::succeeding(*n, "x")) as Arc<dyn Provider>)
            .collect()
    }

    #[tokio::test]
    async fn round_robin_moves_only_the_chosen_provider_to_the_front() {
        let router = build_router(stub_providers(&["a", "b", "c", "d"]), "round-robin");

        // First call: cursor 0 -> index 0, no reordering.
        assert_eq!(router.attempt_order(), vec!["a", "b", "c", "d"]);
        // Second call: cursor 1 -> index 1, "b" moves to the front, the rest
        // keep their original relative order (not a full rotation).
        assert_eq!(router.attempt_order(), vec!["b", "a", "c", "d"]);
    }

    #[tokio::test]
    async fn random_moves_only_the_chosen_provider_to_the_front() {
        let mut router = build_router(stub_providers(&["a", "b", "c", "d"]), "random");
        router.random = Arc::new(FixedRandomSource(1));

        assert_eq!(router.attempt_order(), vec!["b", "a", "c", "d"]);
    }
}
