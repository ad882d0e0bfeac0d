//! Cross-process metrics sharing (§4.8): multiple server processes (one per
//! IDE window) each publish their snapshot into a single JSON file under
//! `~/.mcp-code-api/metrics.json`, keyed by `mcp-<pid>`, so `GET /api/metrics`
//! can aggregate across every live instance.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{LatencySummary, MetricsTracker, ProviderMetricsSnapshot};
use crate::health::HealthStatus;
use crate::{Error, Result};

const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);
const STALE_AFTER_SECS: u64 = 10;

/// One process's published snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceMetrics {
    /// Epoch seconds this entry was last written
    pub updated_epoch_secs: u64,
    /// Overall request counters
    pub total_requests: u64,
    /// Successful requests
    pub successful_requests: u64,
    /// Failed requests
    pub failed_requests: u64,
    /// Router fallback attempts
    pub fallback_attempts: u64,
    /// Per-provider(/model) snapshots
    pub provider_metrics: HashMap<String, ProviderMetricsSnapshot>,
    /// Per-provider health
    pub health: HashMap<String, HealthStatus>,
    /// End-to-end latency summary
    pub overall_latency: LatencySummary,
}

/// On-disk document shape: `{ instances: { <id>: InstanceMetrics }, updated: RFC3339 }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredMetrics {
    /// Live instance entries, keyed `mcp-<pid>`
    #[serde(default)]
    pub instances: HashMap<String, InstanceMetrics>,
    /// RFC3339 timestamp of the last write
    #[serde(default)]
    pub updated: String,
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Default shared-store path: `~/.mcp-code-api/metrics.json`
#[must_use]
pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".mcp-code-api").join("metrics.json"))
}

/// Serializes reads/writes of the shared metrics file for this process
pub struct SharedStore {
    path: PathBuf,
    instance_id: String,
    write_lock: Mutex<()>,
}

impl SharedStore {
    /// Build a store keyed `mcp-<pid>` at `path`
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            instance_id: format!("mcp-{}", std::process::id()),
            write_lock: Mutex::new(()),
        }
    }

    /// Read the current on-disk document (empty if missing or unparseable)
    #[must_use]
    pub fn read(&self) -> StoredMetrics {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    fn write_atomic(&self, doc: &StoredMetrics) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_string_pretty(doc).map_err(Error::from)?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Read, upsert this process's entry, evict stale entries, write atomically
    fn publish_once(&self, entry: InstanceMetrics) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut doc = self.read();

        let now = now_epoch_secs();
        doc.instances
            .retain(|_, v| now.saturating_sub(v.updated_epoch_secs) < STALE_AFTER_SECS);
        doc.instances.insert(self.instance_id.clone(), entry);
        doc.updated = Utc::now().to_rfc3339();

        self.write_atomic(&doc)
    }

    /// Remove this process's entry on clean shutdown
    pub fn remove_self(&self) {
        let _guard = self.write_lock.lock();
        let mut doc = self.read();
        doc.instances.remove(&self.instance_id);
        doc.updated = Utc::now().to_rfc3339();
        let _ = self.write_atomic(&doc);
    }

    /// Snapshot this process's tracker and health map into an [`InstanceMetrics`] entry
    #[must_use]
    pub fn snapshot_entry(
        tracker: &MetricsTracker,
        health: &HashMap<String, HealthStatus>,
    ) -> InstanceMetrics {
        let (total, success, failed, fallback) = tracker.totals();
        InstanceMetrics {
            updated_epoch_secs: now_epoch_secs(),
            total_requests: total,
            successful_requests: success,
            failed_requests: failed,
            fallback_attempts: fallback,
            provider_metrics: tracker.all_snapshots(),
            health: health.clone(),
            overall_latency: tracker.overall_latency(),
        }
    }

    /// Run the 2s flush loop until `shutdown` cancels, then remove this instance's entry
    pub async fn run(
        &self,
        tracker: &MetricsTracker,
        health: &crate::health::HealthMonitor,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    self.remove_self();
                    return;
                }
                _ = ticker.tick() => {
                    let entry = Self::snapshot_entry(tracker, &health.snapshot());
                    if let Err(e) = self.publish_once(entry) {
                        tracing::warn!(error = %e, "failed to publish shared metrics");
                    }
                }
            }
        }
    }
}

/// Aggregate `GET /api/metrics` view across every live instance in `doc`
#[must_use]
pub fn aggregate(doc: &StoredMetrics) -> AggregatedMetrics {
    let mut total = 0;
    let mut success = 0;
    let mut failed = 0;
    let mut fallback = 0;
    let mut health: HashMap<String, HealthStatus> = HashMap::new();
    let mut grouped: HashMap<String, Vec<&ProviderMetricsSnapshot>> = HashMap::new();

    for instance in doc.instances.values() {
        total += instance.total_requests;
        success += instance.successful_requests;
        failed += instance.failed_requests;
        fallback += instance.fallback_attempts;

        for (name, status) in &instance.health {
            let replace = health
                .get(name)
                .is_none_or(|existing| status.last_checked_ms >= existing.last_checked_ms);
            if replace {
                health.insert(name.clone(), status.clone());
            }
        }

        for (key, snapshot) in &instance.provider_metrics {
            grouped.entry(key.clone()).or_default().push(snapshot);
        }
    }

    let provider_metrics = grouped
        .into_iter()
        .map(|(key, snapshots)| (key, merge_provider_snapshots(&snapshots)))
        .collect();

    AggregatedMetrics {
        total_requests: total,
        successful_requests: success,
        failed_requests: failed,
        fallback_attempts: fallback,
        active_instances: doc.instances.len(),
        health_status: health,
        provider_metrics,
    }
}

/// Merge every live instance's snapshot for one provider(/model) key.
///
/// Counters and `total_latency_ms` are summed, `max_latency_ms` takes the
/// maximum and `min_latency_ms` the minimum across instances, and
/// `average_ms`/percentiles are true means rather than pairwise folds so the
/// result doesn't depend on `HashMap` iteration order.
fn merge_provider_snapshots(snapshots: &[&ProviderMetricsSnapshot]) -> ProviderMetricsSnapshot {
    let first = snapshots[0];
    let mut merged = ProviderMetricsSnapshot {
        name: first.name.clone(),
        model: first.model.clone(),
        total_requests: 0,
        successful_requests: 0,
        failed_requests: 0,
        total_tokens: 0,
        total_latency_ms: 0,
        last_used_ms: 0,
        latency: LatencySummary::default(),
        avg_tokens_per_sec: 0.0,
    };

    let mut min_latency = None;
    let mut max_latency = None;
    let mut p50 = PercentileAccumulator::default();
    let mut p95 = PercentileAccumulator::default();
    let mut p99 = PercentileAccumulator::default();

    for snapshot in snapshots {
        merged.total_requests += snapshot.total_requests;
        merged.successful_requests += snapshot.successful_requests;
        merged.failed_requests += snapshot.failed_requests;
        merged.total_tokens += snapshot.total_tokens;
        merged.total_latency_ms += snapshot.total_latency_ms;
        merged.last_used_ms = merged.last_used_ms.max(snapshot.last_used_ms);

        min_latency = min_opt(min_latency, snapshot.latency.min_latency_ms);
        max_latency = max_opt(max_latency, snapshot.latency.max_latency_ms);
        p50.add(snapshot.latency.p50_ms);
        p95.add(snapshot.latency.p95_ms);
        p99.add(snapshot.latency.p99_ms);
    }

    merged.latency.min_latency_ms = min_latency;
    merged.latency.max_latency_ms = max_latency;
    merged.latency.p50_ms = p50.mean();
    merged.latency.p95_ms = p95.mean();
    merged.latency.p99_ms = p99.mean();

    if merged.successful_requests > 0 {
        #[allow(clippy::cast_precision_loss)]
        let average_ms = merged.total_latency_ms as f64 / merged.successful_requests as f64;
        merged.latency.average_ms = Some(average_ms);

        let avg_latency_s = average_ms / 1000.0;
        #[allow(clippy::cast_precision_loss)]
        let denom = avg_latency_s * merged.successful_requests as f64;
        merged.avg_tokens_per_sec = if denom > 0.0 {
            merged.total_tokens as f64 / denom
        } else {
            0.0
        };
    }

    merged
}

/// Running count/sum for averaging an `Option<u64>` percentile across instances
#[derive(Default)]
struct PercentileAccumulator {
    sum: u64,
    count: u64,
}

impl PercentileAccumulator {
    fn add(&mut self, value: Option<u64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<u64> {
        (self.count > 0).then(|| self.sum / self.count)
    }
}

fn min_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

fn max_opt(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (None, None) => None,
    }
}

/// Summed/merged view served from `GET /api/metrics`
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedMetrics {
    /// Sum of `TotalRequests` across live instances
    pub total_requests: u64,
    /// Sum of `SuccessfulRequests`
    pub successful_requests: u64,
    /// Sum of `FailedRequests`
    pub failed_requests: u64,
    /// Sum of `FallbackAttempts`
    pub fallback_attempts: u64,
    /// Number of live instances contributing
    pub active_instances: usize,
    /// Per-provider health, most-recently-checked instance wins
    pub health_status: HashMap<String, HealthStatus>,
    /// Per-provider(/model) metrics, summed/averaged across instances
    pub provider_metrics: HashMap<String, ProviderMetricsSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_read_includes_the_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::new(dir.path().join("metrics.json"));

        let entry = InstanceMetrics {
            updated_epoch_secs: now_epoch_secs(),
            total_requests: 5,
            successful_requests: 4,
            failed_requests: 1,
            fallback_attempts: 0,
            provider_metrics: HashMap::new(),
            health: HashMap::new(),
            overall_latency: LatencySummary::default(),
        };
        store.publish_once(entry).unwrap();

        let doc = store.read();
        assert_eq!(doc.instances.len(), 1);
        let aggregated = aggregate(&doc);
        assert_eq!(aggregated.total_requests, 5);
        assert_eq!(aggregated.active_instances, 1);
    }

    #[test]
    fn stale_instances_are_evicted_on_publish() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::new(dir.path().join("metrics.json"));

        let mut doc = StoredMetrics::default();
        doc.instances.insert(
            "mcp-9999".to_string(),
            InstanceMetrics {
                updated_epoch_secs: 0,
                total_requests: 1,
                successful_requests: 1,
                failed_requests: 0,
                fallback_attempts: 0,
                provider_metrics: HashMap::new(),
                health: HashMap::new(),
                overall_latency: LatencySummary::default(),
            },
        );
        store.write_atomic(&doc).unwrap();

        store
            .publish_once(InstanceMetrics {
                updated_epoch_secs: now_epoch_secs(),
                total_requests: 2,
                successful_requests: 2,
                failed_requests: 0,
                fallback_attempts: 0,
                provider_metrics: HashMap::new(),
                health: HashMap::new(),
                overall_latency: LatencySummary::default(),
            })
            .unwrap();

        let doc = store.read();
        assert_eq!(doc.instances.len(), 1);
        assert!(!doc.instances.contains_key("mcp-9999"));
    }

    fn provider_snapshot(successful: u64, total_latency_ms: u64, p50: u64) -> ProviderMetricsSnapshot {
        ProviderMetricsSnapshot {
            name: "cerebras".to_string(),
            model: None,
            total_requests: successful,
            successful_requests: successful,
            failed_requests: 0,
            total_tokens: 0,
            total_latency_ms,
            last_used_ms: 0,
            latency: LatencySummary {
                min_latency_ms: Some(p50),
                p50_ms: Some(p50),
                p95_ms: Some(p50),
                p99_ms: Some(p50),
                max_latency_ms: Some(p50),
                average_ms: None,
            },
            avg_tokens_per_sec: 0.0,
        }
    }

    #[test]
    fn merging_three_instances_averages_percentiles_as_a_true_mean() {
        let a = provider_snapshot(1, 100, 100);
        let b = provider_snapshot(1, 200, 200);
        let c = provider_snapshot(1, 300, 300);

        let merged = merge_provider_snapshots(&[&a, &b, &c]);

        // True mean of 100/200/300, not a pairwise-folded (100+200)/2 then
        // averaged again with 300.
        assert_eq!(merged.latency.p50_ms, Some(200));
        assert_eq!(merged.successful_requests, 3);
        assert_eq!(merged.total_latency_ms, 600);
        assert!((merged.latency.average_ms.unwrap() - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn remove_self_clears_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedStore::new(dir.path().join("metrics.json"));
        store
            .publish_once(InstanceMetrics {
                updated_epoch_secs: now_epoch_secs(),
                total_requests: 1,
                successful_requests: 1,
                failed_requests: 0,
                fallback_attempts: 0,
                provider_metrics: HashMap::new(),
                health: HashMap::new(),
                overall_latency: LatencySummary::default(),
            })
            .unwrap();
        store.remove_self();
        assert!(store.read().instances.is_empty());
    }
}
