//! Registry node server

use crate::cluster::{ClusterCoordinator, ClusterTiming, Membership};
use crate::common::config::RegistryConfig;
use crate::common::metrics::RegistryMetrics;
use crate::common::{Error, Result};
use crate::node::http::{create_router, NodeState};
use crate::registry::expiry::ExpirySweeper;
use crate::registry::service::RegistryService;
use crate::registry::store::InstanceStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct RegistryNode {
    config: RegistryConfig,
    timing: ClusterTiming,
}

/// A running node. Dropping the handle also stops the HTTP server.
pub struct NodeHandle {
    pub local_addr: SocketAddr,
    pub service: Arc<RegistryService>,
    pub coordinator: Arc<ClusterCoordinator>,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<()>,
    background: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    pub fn store(&self) -> &Arc<InstanceStore> {
        self.service.store()
    }

    /// Stop accepting requests, close idle connections and cancel the background tasks.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        for task in &self.background {
            task.abort();
        }
    }

    /// Run until the HTTP server exits.
    pub async fn wait(self) -> Result<()> {
        let result = self.server.await;
        for task in &self.background {
            task.abort();
        }
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(Error::Internal(format!("HTTP server task failed: {}", e))),
        }
    }
}

impl RegistryNode {
    pub fn new(config: RegistryConfig) -> Self {
        let timing = ClusterTiming::from_config(&config);
        Self { config, timing }
    }

    pub fn with_timing(mut self, timing: ClusterTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Serve on `listener`, then resolve the master and start the background tasks.
    pub async fn start(self, listener: TcpListener) -> Result<NodeHandle> {
        let local_addr = listener.local_addr()?;
        let membership = Membership::from_config(&self.config);

        tracing::info!(
            "Starting registry node {} (minireg {})",
            membership.self_addr(),
            crate::BUILD_INFO
        );
        tracing::info!("  HTTP API: {}", local_addr);
        tracing::info!("  Cluster: {:?}", membership.candidates());
        tracing::info!(
            "  Heartbeat timeout: {}s, sweep every {}s, master check every {:?}",
            self.config.heartbeat.timeout_seconds,
            self.config.heartbeat.cleanup_interval,
            self.timing.check_interval
        );

        let metrics = Arc::new(RegistryMetrics::new());
        let store = Arc::new(InstanceStore::new());
        let self_addr = membership.self_addr().to_string();
        let coordinator = ClusterCoordinator::new(
            membership,
            store.clone(),
            metrics.clone(),
            self.timing.clone(),
        );
        let service = Arc::new(RegistryService::new(
            store,
            coordinator.clone(),
            metrics,
        ));

        let router = create_router(NodeState {
            service: service.clone(),
            cluster: Some(coordinator.clone()),
            self_addr,
        });
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(async move {
            let app = router.into_make_service_with_connect_info::<SocketAddr>();
            let stopped = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(stopped)
                .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
            tracing::info!("HTTP server stopped");
        });

        // Subscribe before resolving the master so the first BecameMaster is not missed.
        let sweeper = ExpirySweeper::new(
            service.clone(),
            self.config.heartbeat.timeout_seconds,
            self.config.cleanup_interval(),
        )
        .spawn(Some(coordinator.subscribe()));

        let health_loop = coordinator.start().await;
        tracing::info!("✓ Registry node ready ({})", coordinator.role());

        Ok(NodeHandle {
            local_addr,
            service,
            coordinator,
            shutdown,
            server,
            background: vec![sweeper, health_loop],
        })
    }

    /// Bind the configured address and serve until the server stops.
    pub async fn serve(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr()?).await?;
        self.start(listener).await?.wait().await
    }
}
