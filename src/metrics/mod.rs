//! Per-process metrics tracking: latency ring buffers, by-provider and
//! by-provider/model counters, and the overall end-to-end latency tracker.

pub mod server;
pub mod shared_store;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::provider::Usage;

/// Ring buffer capacity for successful-request latency samples
pub const LATENCY_CAPACITY: usize = 1000;

/// Bounded ring buffer of successful-request latencies (milliseconds).
/// Unsorted storage; percentiles are computed on read by copy + sort.
#[derive(Debug, Default)]
pub struct LatencyTracker {
    samples: Vec<u64>,
    capacity: usize,
}

impl LatencyTracker {
    /// Create a tracker with the default capacity (1000)
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
            capacity: LATENCY_CAPACITY,
        }
    }

    /// Record a successful-request duration
    pub fn record(&mut self, latency: Duration) {
        if self.samples.len() >= self.capacity {
            self.samples.remove(0);
        }
        self.samples.push(latency.as_millis() as u64);
    }

    /// Number of recorded samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the ring buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn sorted(&self) -> Vec<u64> {
        let mut s = self.samples.clone();
        s.sort_unstable();
        s
    }

    /// Minimum latency in the buffer
    #[must_use]
    pub fn min(&self) -> Option<u64> {
        self.samples.iter().copied().min()
    }

    /// Maximum latency in the buffer
    #[must_use]
    pub fn max(&self) -> Option<u64> {
        self.samples.iter().copied().max()
    }

    /// Average latency in the buffer
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let avg = self.sum() as f64 / self.samples.len() as f64;
        Some(avg)
    }

    /// Sum of every recorded latency, backing shared-store aggregation (§4.8)
    #[must_use]
    pub fn sum(&self) -> u64 {
        self.samples.iter().sum()
    }

    /// Compute the `p`-th percentile (0.0-1.0) by sorting a copy of the buffer
    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let sorted = self.sorted();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = ((sorted.len() as f64) * p).floor() as usize;
        let index = index.min(sorted.len() - 1);
        Some(sorted[index])
    }

    /// Percentile summary used by both per-provider and overall metrics
    #[must_use]
    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            min_latency_ms: self.min(),
            p50_ms: self.percentile(0.50),
            p95_ms: self.percentile(0.95),
            p99_ms: self.percentile(0.99),
            max_latency_ms: self.max(),
            average_ms: self.average(),
        }
    }
}

/// Percentile snapshot of a [`LatencyTracker`]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatencySummary {
    /// Minimum latency observed
    pub min_latency_ms: Option<u64>,
    /// 50th percentile
    pub p50_ms: Option<u64>,
    /// 95th percentile
    pub p95_ms: Option<u64>,
    /// 99th percentile
    pub p99_ms: Option<u64>,
    /// Maximum latency observed
    pub max_latency_ms: Option<u64>,
    /// Average latency
    pub average_ms: Option<f64>,
}

fn epoch_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Per-provider (or per-provider/model) metrics row.
/// Invariant: `total == successful + failed`.
pub struct ProviderMetrics {
    name: String,
    model: Option<String>,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    total_tokens: AtomicU64,
    last_used_ms: AtomicU64,
    latency: RwLock<LatencyTracker>,
}

impl ProviderMetrics {
    /// Create an empty metrics row for `name` (and optionally `model`)
    #[must_use]
    pub fn new(name: impl Into<String>, model: Option<String>) -> Self {
        Self {
            name: name.into(),
            model,
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
            last_used_ms: AtomicU64::new(0),
            latency: RwLock::new(LatencyTracker::new()),
        }
    }

    /// Record a successful completion
    pub fn record_success(&self, latency: Duration, usage: Usage) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.total_tokens
            .fetch_add(usage.total_tokens, Ordering::Relaxed);
        self.last_used_ms.store(epoch_millis_now(), Ordering::Relaxed);
        self.latency.write().record(latency);
    }

    /// Record a failed completion (no latency contribution)
    pub fn record_failure(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.last_used_ms.store(epoch_millis_now(), Ordering::Relaxed);
    }

    /// Snapshot this row for serialization
    #[must_use]
    pub fn snapshot(&self) -> ProviderMetricsSnapshot {
        let latency = self.latency.read();
        let successful = self.successful.load(Ordering::Relaxed);
        let total_tokens = self.total_tokens.load(Ordering::Relaxed);
        let avg_latency_s = latency.average().unwrap_or(0.0) / 1000.0;

        let avg_tokens_per_sec = if total_tokens > 0 && avg_latency_s > 0.0 && successful > 0 {
            #[allow(clippy::cast_precision_loss)]
            let denom = avg_latency_s * successful as f64;
            total_tokens as f64 / denom
        } else {
            0.0
        };

        ProviderMetricsSnapshot {
            name: self.name.clone(),
            model: self.model.clone(),
            total_requests: self.total.load(Ordering::Relaxed),
            successful_requests: successful,
            failed_requests: self.failed.load(Ordering::Relaxed),
            total_tokens,
            total_latency_ms: latency.sum(),
            last_used_ms: self.last_used_ms.load(Ordering::Relaxed),
            latency: latency.summary(),
            avg_tokens_per_sec,
        }
    }
}

/// Serializable snapshot of a [`ProviderMetrics`] row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetricsSnapshot {
    /// Provider name
    pub name: String,
    /// Model, absent for the provider-aggregate row
    pub model: Option<String>,
    /// Total attempts
    pub total_requests: u64,
    /// Successful attempts
    pub successful_requests: u64,
    /// Failed attempts
    pub failed_requests: u64,
    /// Total tokens across successful attempts
    pub total_tokens: u64,
    /// Sum of every successful attempt's latency, in milliseconds. Backs
    /// shared-store reconstruction of `latency.average_ms` across instances
    /// (§4.8), since averages can't themselves be averaged correctly.
    #[serde(default)]
    pub total_latency_ms: u64,
    /// Last-used timestamp, epoch milliseconds
    pub last_used_ms: u64,
    /// Latency percentile summary
    pub latency: LatencySummary,
    /// Derived: `TotalTokens / (AvgLatencySeconds * SuccessfulRequests)`
    pub avg_tokens_per_sec: f64,
}

/// Tracks by-provider and by-provider/model metrics plus the combined
/// end-to-end latency tracker and fallback-attempt counter.
pub struct MetricsTracker {
    by_provider: DashMap<String, Arc<ProviderMetrics>>,
    by_provider_model: DashMap<String, Arc<ProviderMetrics>>,
    overall_total: AtomicU64,
    overall_success: AtomicU64,
    overall_failed: AtomicU64,
    fallback_attempts: AtomicU64,
    overall_latency: RwLock<LatencyTracker>,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_provider: DashMap::new(),
            by_provider_model: DashMap::new(),
            overall_total: AtomicU64::new(0),
            overall_success: AtomicU64::new(0),
            overall_failed: AtomicU64::new(0),
            fallback_attempts: AtomicU64::new(0),
            overall_latency: RwLock::new(LatencyTracker::new()),
        }
    }

    fn row(map: &DashMap<String, Arc<ProviderMetrics>>, key: &str, name: &str, model: Option<&str>) -> Arc<ProviderMetrics> {
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(ProviderMetrics::new(name, model.map(str::to_string))))
            .clone()
    }

    /// Get (creating if absent) the aggregate row for `provider`
    #[must_use]
    pub fn provider_row(&self, provider: &str) -> Arc<ProviderMetrics> {
        Self::row(&self.by_provider, provider, provider, None)
    }

    /// Get (creating if absent) the per-model row for `provider/model`
    #[must_use]
    pub fn provider_model_row(&self, provider: &str, model: &str) -> Arc<ProviderMetrics> {
        let key = format!("{provider}/{model}");
        Self::row(&self.by_provider_model, &key, provider, Some(model))
    }

    /// Record a completed attempt into both the aggregate and per-model rows,
    /// and into the overall end-to-end tracker.
    pub fn record_completion(
        &self,
        provider: &str,
        model: &str,
        latency: Duration,
        outcome: &Result<Usage, ()>,
    ) {
        let provider_row = self.provider_row(provider);
        let model_row = self.provider_model_row(provider, model);

        match outcome {
            Ok(usage) => {
                provider_row.record_success(latency, *usage);
                model_row.record_success(latency, *usage);
                self.overall_success.fetch_add(1, Ordering::Relaxed);
                self.overall_latency.write().record(latency);
            }
            Err(()) => {
                provider_row.record_failure();
                model_row.record_failure();
                self.overall_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.overall_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that the router fell back to another provider
    pub fn record_fallback_attempt(&self) {
        self.fallback_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// All aggregate-row snapshots, keyed `name` or `name/model`
    #[must_use]
    pub fn all_snapshots(&self) -> std::collections::HashMap<String, ProviderMetricsSnapshot> {
        let mut out = std::collections::HashMap::new();
        for entry in &self.by_provider {
            out.insert(entry.key().clone(), entry.value().snapshot());
        }
        for entry in &self.by_provider_model {
            out.insert(entry.key().clone(), entry.value().snapshot());
        }
        out
    }

    /// Overall request counters
    #[must_use]
    pub fn totals(&self) -> (u64, u64, u64, u64) {
        (
            self.overall_total.load(Ordering::Relaxed),
            self.overall_success.load(Ordering::Relaxed),
            self.overall_failed.load(Ordering::Relaxed),
            self.fallback_attempts.load(Ordering::Relaxed),
        )
    }

    /// Overall end-to-end latency summary
    #[must_use]
    pub fn overall_latency(&self) -> LatencySummary {
        self.overall_latency.read().summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_percentiles_are_ordered() {
        let mut t = LatencyTracker::new();
        for ms in [10, 20, 30, 40, 50] {
            t.record(Duration::from_millis(ms));
        }
        let s = t.summary();
        assert!(s.min_latency_ms.unwrap() <= s.p50_ms.unwrap());
        assert!(s.p50_ms.unwrap() <= s.p95_ms.unwrap());
        assert!(s.p95_ms.unwrap() <= s.p99_ms.unwrap());
        assert!(s.p99_ms.unwrap() <= s.max_latency_ms.unwrap());
    }

    #[test]
    fn latency_ring_buffer_never_exceeds_capacity() {
        let mut t = LatencyTracker::new();
        for ms in 0..(LATENCY_CAPACITY as u64 + 500) {
            t.record(Duration::from_millis(ms));
        }
        assert_eq!(t.len(), LATENCY_CAPACITY);
    }

    #[test]
    fn total_equals_success_plus_failed() {
        let tracker = MetricsTracker::new();
        tracker.record_completion(
            "cerebras",
            "llama-3",
            Duration::from_millis(50),
            &Ok(Usage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
        );
        tracker.record_completion("cerebras", "llama-3", Duration::from_millis(0), &Err(()));

        let (total, success, failed, _) = tracker.totals();
        assert_eq!(total, success + failed);
        assert_eq!(total, 2);
        assert_eq!(success, 1);
        assert_eq!(failed, 1);
    }

    #[test]
    fn avg_tokens_per_sec_is_zero_without_samples() {
        let row = ProviderMetrics::new("cerebras", None);
        let snapshot = row.snapshot();
        assert_eq!(snapshot.avg_tokens_per_sec, 0.0);
    }

    #[test]
    fn avg_tokens_per_sec_derivation() {
        let row = ProviderMetrics::new("cerebras", None);
        row.record_success(
            Duration::from_secs(2),
            Usage {
                prompt_tokens: 0,
                completion_tokens: 100,
                total_tokens: 100,
            },
        );
        let snapshot = row.snapshot();
        // 100 tokens / (2s avg * 1 successful) = 50 tok/s
        assert!((snapshot.avg_tokens_per_sec - 50.0).abs() < 0.01);
    }
}
