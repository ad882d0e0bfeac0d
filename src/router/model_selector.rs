//! Per-provider model selection, independent of which provider the router
//! picked. Three strategies: `failover` (default), `round-robin`, `random`.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::random::RandomSource;

/// Per-provider model-selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStrategy {
    /// First non-failed model in configured order; resets when all have failed
    Failover,
    /// Cycles through the list regardless of failure state
    RoundRobin,
    /// Uniform pick regardless of failure state
    Random,
}

impl ModelStrategy {
    /// Parse the config string (`"failover"`, `"round-robin"`, `"random"`), defaulting to failover
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "round-robin" => Self::RoundRobin,
            "random" => Self::Random,
            _ => Self::Failover,
        }
    }
}

/// Selects a model from a provider's candidate list on each call
pub struct ModelSelector {
    strategy: ModelStrategy,
    models: Vec<String>,
    cursor: AtomicUsize,
    failed: Mutex<HashSet<String>>,
    random: Arc<dyn RandomSource>,
}

impl ModelSelector {
    /// Build a selector over `models` (must be non-empty)
    #[must_use]
    pub fn new(strategy: ModelStrategy, models: Vec<String>, random: Arc<dyn RandomSource>) -> Self {
        Self {
            strategy,
            models,
            cursor: AtomicUsize::new(0),
            failed: Mutex::new(HashSet::new()),
            random,
        }
    }

    /// Pick the next model to try
    #[must_use]
    pub fn select(&self) -> String {
        if self.models.is_empty() {
            return String::new();
        }
        match self.strategy {
            ModelStrategy::Failover => self.select_failover(),
            ModelStrategy::RoundRobin => {
                let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.models.len();
                self.models[idx].clone()
            }
            ModelStrategy::Random => {
                let idx = self.random.pick_index(self.models.len());
                self.models[idx].clone()
            }
        }
    }

    fn select_failover(&self) -> String {
        let mut failed = self.failed.lock();
        if let Some(model) = self.models.iter().find(|m| !failed.contains(*m)) {
            return model.clone();
        }
        // every model has failed: reset and start over
        failed.clear();
        self.models[0].clone()
    }

    /// Report that `model` failed on the most recent attempt
    pub fn record_failure(&self, model: &str) {
        if self.strategy == ModelStrategy::Failover {
            self.failed.lock().insert(model.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::FixedRandomSource;

    fn models() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    #[test]
    fn failover_skips_failed_models_then_resets() {
        let selector = ModelSelector::new(ModelStrategy::Failover, models(), Arc::new(FixedRandomSource(0)));
        assert_eq!(selector.select(), "a");
        selector.record_failure("a");
        assert_eq!(selector.select(), "b");
        selector.record_failure("b");
        selector.record_failure("c");
        // all failed: resets and returns first again
        assert_eq!(selector.select(), "a");
    }

    #[test]
    fn round_robin_cycles_regardless_of_failures() {
        let selector = ModelSelector::new(ModelStrategy::RoundRobin, models(), Arc::new(FixedRandomSource(0)));
        assert_eq!(selector.select(), "a");
        assert_eq!(selector.select(), "b");
        selector.record_failure("b");
        assert_eq!(selector.select(), "c");
        assert_eq!(selector.select(), "a");
    }

    #[test]
    fn random_uses_injected_source() {
        let selector = ModelSelector::new(ModelStrategy::Random, models(), Arc::new(FixedRandomSource(2)));
        assert_eq!(selector.select(), "c");
    }
}
