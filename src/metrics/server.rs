//! Optional metrics HTTP endpoint (§4.9): a tiny dashboard plus the JSON
//! routes it polls. Shutdown follows the teacher's inflight-drain pattern,
//! applied to axum's own graceful-shutdown future with a 5s hard cap.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::get;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::shared_store::{aggregate, AggregatedMetrics, SharedStore, StoredMetrics};
use super::MetricsTracker;
use crate::health::HealthMonitor;
use crate::{Error, Result};

const DASHBOARD_HTML: &str = r#"<!doctype html>
<html><head><title>mcp-code-api metrics</title></head>
<body>
<h1>mcp-code-api</h1>
<pre id="metrics">loading...</pre>
<script>
async function poll() {
  const res = await fetch('/api/metrics');
  document.getElementById('metrics').textContent = JSON.stringify(await res.json(), null, 2);
}
poll();
setInterval(poll, 2000);
</script>
</body></html>"#;

/// Shared state backing the metrics HTTP routes
pub struct MetricsServer {
    host: String,
    port: u16,
    tracker: Arc<MetricsTracker>,
    health: Arc<HealthMonitor>,
    shared_store: Option<Arc<SharedStore>>,
}

impl MetricsServer {
    /// Build a server bound to `host:port`
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        tracker: Arc<MetricsTracker>,
        health: Arc<HealthMonitor>,
        shared_store: Option<Arc<SharedStore>>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            tracker,
            health,
            shared_store,
        }
    }

    fn router(self: Arc<Self>) -> axum::Router {
        axum::Router::new()
            .route("/", get(dashboard))
            .route("/api/metrics", get(metrics_handler))
            .route("/api/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    fn local_aggregate(&self) -> AggregatedMetrics {
        let (total, success, failed, fallback) = self.tracker.totals();
        AggregatedMetrics {
            total_requests: total,
            successful_requests: success,
            failed_requests: failed,
            fallback_attempts: fallback,
            active_instances: 1,
            health_status: self.health.snapshot(),
            provider_metrics: self.tracker.all_snapshots(),
        }
    }

    fn shared_aggregate(&self) -> Option<AggregatedMetrics> {
        let store = self.shared_store.as_ref()?;
        let doc: StoredMetrics = store.read();
        Some(aggregate(&doc))
    }

    /// Run until `shutdown` cancels, draining in-flight connections for up to 5s
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the listener can't bind, or [`Error::Internal`]
    /// if the server task itself errors or panics.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid metrics bind address: {e}")))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let app = self.clone().router();

        let graceful_shutdown = shutdown.clone();
        let server_task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    graceful_shutdown.cancelled().await;
                })
                .await
        });

        shutdown.cancelled().await;

        match tokio::time::timeout(Duration::from_secs(5), server_task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(Error::Internal(e.to_string())),
            Ok(Err(join_err)) => Err(Error::Internal(join_err.to_string())),
            Err(_) => {
                tracing::warn!("metrics server drain exceeded 5s");
                Ok(())
            }
        }
    }
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn metrics_handler(State(server): State<Arc<MetricsServer>>) -> impl IntoResponse {
    let aggregated = server.shared_aggregate().unwrap_or_else(|| server.local_aggregate());
    (StatusCode::OK, Json(aggregated))
}

async fn health_handler(State(server): State<Arc<MetricsServer>>) -> impl IntoResponse {
    let status = server
        .shared_aggregate()
        .map(|a| a.health_status)
        .unwrap_or_else(|| server.health.snapshot());
    (StatusCode::OK, Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_aggregate_reports_a_single_instance() {
        let server = MetricsServer::new(
            "127.0.0.1",
            0,
            Arc::new(MetricsTracker::new()),
            Arc::new(HealthMonitor::new(3)),
            None,
        );
        assert_eq!(server.local_aggregate().active_instances, 1);
    }
}
