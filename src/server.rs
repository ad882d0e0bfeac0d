//! Top-level orchestration (§4.9): builds every provider, wires the router,
//! health monitor, metrics tracker/shared store, and optional metrics HTTP
//! server around one root cancellation token, then runs the stdio loop.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::dispatcher::Dispatcher;
use crate::health::HealthMonitor;
use crate::metrics::shared_store::SharedStore;
use crate::metrics::server::MetricsServer;
use crate::metrics::MetricsTracker;
use crate::protocol::Info;
use crate::provider::{Provider, ProviderRegistry};
use crate::random::ThreadRandomSource;
use crate::router::Router;
use crate::rpc_loop::RpcLoop;
use crate::validator::NoopValidator;
use crate::Result;

/// Owns every long-lived subsystem and the root cancellation token
pub struct Server {
    config: AppConfig,
}

impl Server {
    /// Build a server around a loaded configuration
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    fn build_providers(&self, metrics: &Arc<MetricsTracker>) -> HashMap<String, Arc<dyn Provider>> {
        let registry = ProviderRegistry::with_builtins();
        let mut providers = HashMap::new();

        for (name, provider_config) in self.config.authenticated_providers() {
            match registry.create_provider(name, name, provider_config, metrics.clone()) {
                Ok(provider) => {
                    providers.insert(name.clone(), provider);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "skipping provider, no matching constructor");
                }
            }
        }

        providers
    }

    /// Run until SIGINT/SIGTERM, or until stdin closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared store path can't be created or the
    /// metrics server fails to bind.
    pub async fn run(self) -> Result<()> {
        let cancel = CancellationToken::new();

        let metrics = Arc::new(MetricsTracker::new());
        let health = Arc::new(HealthMonitor::new(self.config.router.health.failure_threshold));
        let providers = self.build_providers(&metrics);

        info!(providers = providers.len(), "configured providers");

        let router = Arc::new(Router::new(
            &self.config,
            providers.clone(),
            metrics.clone(),
            health.clone(),
            Arc::new(ThreadRandomSource),
        ));
        let dispatcher = Arc::new(Dispatcher::new(router, Arc::new(NoopValidator)));

        let shared_store = crate::metrics::shared_store::default_path().map(|path| Arc::new(SharedStore::new(path)));

        let mut tasks = Vec::new();

        if self.config.router.health.enabled {
            let health = health.clone();
            let provider_list: Vec<Arc<dyn Provider>> = providers.values().cloned().collect();
            let interval = self.config.router.health.interval;
            let timeout = self.config.router.health.timeout;
            let shutdown = cancel.clone();
            tasks.push(tokio::spawn(async move {
                health.run(provider_list, interval, timeout, shutdown).await;
            }));
        }

        if let Some(store) = shared_store.clone() {
            let tracker = metrics.clone();
            let health = health.clone();
            let shutdown = cancel.clone();
            tasks.push(tokio::spawn(async move {
                store.run(&tracker, &health, shutdown).await;
            }));
        }

        if self.config.metrics.enabled {
            let metrics_server = Arc::new(MetricsServer::new(
                self.config.metrics.host.clone(),
                self.config.metrics.port,
                metrics.clone(),
                health.clone(),
                shared_store.clone(),
            ));
            let shutdown = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = metrics_server.run(shutdown).await {
                    warn!(error = %e, "metrics server exited with an error");
                }
            }));
        }

        let server_info = Info {
            name: self.config.server.name.clone(),
            version: self.config.server.version.clone(),
        };
        let rpc_loop = RpcLoop::new(dispatcher, server_info, self.config.server.description.clone());

        let signal_cancel = cancel.clone();
        let signals = tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            signal_cancel.cancel();
        });

        let loop_result = rpc_loop.run(cancel.clone()).await;
        cancel.cancel();
        signals.abort();

        for task in tasks {
            let _ = task.await;
        }

        loop_result
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
