//! Per-provider health tracking and the periodic probe loop.
//!
//! Health is advisory: [`crate::router`] consults [`HealthTracker::is_healthy`]
//! when ranking candidates but never refuses to attempt an unhealthy provider
//! outright (a transient probe failure should not take the last working
//! provider out of rotation).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::provider::Provider;

fn epoch_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Per-provider consecutive-failure health tracker
pub struct HealthTracker {
    name: String,
    failure_threshold: u64,
    healthy: AtomicBool,
    consecutive_failures: AtomicU64,
    last_checked_ms: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl HealthTracker {
    /// Build a tracker that flips unhealthy after `failure_threshold` consecutive failures
    #[must_use]
    pub fn new(name: impl Into<String>, failure_threshold: u32) -> Self {
        Self {
            name: name.into(),
            failure_threshold: u64::from(failure_threshold.max(1)),
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicU64::new(0),
            last_checked_ms: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }

    /// Record a successful probe or request, resetting the failure streak
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_checked_ms.store(epoch_millis_now(), Ordering::Relaxed);
        *self.last_error.write() = None;

        if !self.healthy.swap(true, Ordering::Relaxed) {
            info!(provider = %self.name, "provider recovered");
        }
    }

    /// Record a failed probe or request
    pub fn record_failure(&self, error: impl Into<String>) {
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_checked_ms.store(epoch_millis_now(), Ordering::Relaxed);
        *self.last_error.write() = Some(error.into());

        if consecutive >= self.failure_threshold && self.healthy.swap(false, Ordering::Relaxed) {
            warn!(provider = %self.name, consecutive_failures = consecutive, "provider marked unhealthy");
        }
    }

    /// Current health flag
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Snapshot for the metrics endpoint
    #[must_use]
    pub fn status(&self) -> HealthStatus {
        HealthStatus {
            provider: self.name.clone(),
            is_healthy: self.healthy.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_checked_ms: self.last_checked_ms.load(Ordering::Relaxed),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Serializable health snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Provider name
    pub provider: String,
    /// Current health flag
    pub is_healthy: bool,
    /// Current consecutive-failure streak
    pub consecutive_failures: u64,
    /// Last probe/request timestamp, epoch milliseconds
    pub last_checked_ms: u64,
    /// Most recent error message, if any
    pub last_error: Option<String>,
}

/// Owns one [`HealthTracker`] per provider and runs the periodic probe loop
pub struct HealthMonitor {
    trackers: DashMap<String, Arc<HealthTracker>>,
    failure_threshold: u32,
}

impl HealthMonitor {
    /// Build a monitor with the configured failure threshold
    #[must_use]
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            trackers: DashMap::new(),
            failure_threshold,
        }
    }

    /// Get (creating if absent) the tracker for `provider`
    #[must_use]
    pub fn tracker(&self, provider: &str) -> Arc<HealthTracker> {
        self.trackers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(HealthTracker::new(provider, self.failure_threshold)))
            .clone()
    }

    /// All current health statuses, keyed by provider name
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, HealthStatus> {
        self.trackers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect()
    }

    /// Run the periodic probe loop until `shutdown` is cancelled.
    ///
    /// Calls each provider's [`Provider::health_check`] every `interval` and
    /// feeds the outcome into that provider's tracker.
    pub async fn run(
        &self,
        providers: Vec<Arc<dyn Provider>>,
        interval: Duration,
        timeout: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("health monitor shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    for provider in &providers {
                        let tracker = self.tracker(provider.name());
                        match tokio::time::timeout(timeout, provider.health_check()).await {
                            Ok(Ok(())) => tracker.record_success(),
                            Ok(Err(e)) => tracker.record_failure(e.to_string()),
                            Err(_) => tracker.record_failure("health probe timed out"),
                        }
                    }
                }
            }
        }
    }
}
