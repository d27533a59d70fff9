//! Daemon lifecycle: wiring, connectivity probe, scheduler, metrics, shutdown

use anyhow::{Context, Result};
use std::sync::Arc;
use till_core::config::TillConfig;
use till_store::{build_local_operator, HealthCheck, HttpRemote, OpendalStore, RecordStore};
use till_sync::orchestrator::{SyncOptions, SyncParts};
use till_sync::queue::QueueOptions;
use till_sync::{ConnectivityMonitor, MetadataStore, OperationQueue, SyncOrchestrator};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::{HealthState, SyncMetrics};

/// Local records live under this prefix of the data dir; queue and
/// watermarks sit beside them.
const RECORDS_PREFIX: &str = "records";

/// Everything one process needs to queue and sync, built from config.
pub struct Components {
    pub connectivity: ConnectivityMonitor,
    pub remote: Arc<HttpRemote>,
    pub queue: OperationQueue,
    pub metadata: MetadataStore,
    pub orchestrator: SyncOrchestrator,
}

impl Components {
    /// Open local state and build the sync stack. Starts offline; call
    /// [`Components::probe`] to learn the real state.
    pub async fn open(config: &TillConfig) -> Result<Self> {
        let state = build_local_operator(&config.storage.data_dir)?;
        let local: Arc<dyn RecordStore> =
            Arc::new(OpendalStore::new(state.clone(), RECORDS_PREFIX));
        let remote = Arc::new(
            HttpRemote::new(&config.storage.remote_url, config.storage.request_timeout())
                .context("building central store client")?,
        );

        let connectivity = ConnectivityMonitor::new(false);
        let queue = OperationQueue::open(
            state.clone(),
            remote.clone(),
            connectivity.clone(),
            QueueOptions::from_config(&config.queue, &config.storage),
        )
        .await
        .context("opening operation queue")?;
        let metadata = MetadataStore::new(state);

        let orchestrator = SyncOrchestrator::new(
            SyncParts {
                local,
                remote: remote.clone(),
                queue: queue.clone(),
                metadata: metadata.clone(),
                connectivity: connectivity.clone(),
            },
            SyncOptions::from_config(config),
        );

        Ok(Self {
            connectivity,
            remote,
            queue,
            metadata,
            orchestrator,
        })
    }

    /// Check the central store once and record the result.
    pub async fn probe(&self) -> bool {
        match self.remote.check().await {
            Ok(()) => {
                info!(url = %self.remote.base_url(), "central store: reachable");
                self.connectivity.set_online(true);
                true
            }
            Err(e) => {
                warn!(url = %self.remote.base_url(), "central store: {e}");
                self.connectivity.set_online(false);
                false
            }
        }
    }
}

pub async fn run(config: TillConfig) -> Result<()> {
    info!(data_dir = %config.storage.data_dir.display(), "daemon starting");

    let components = Components::open(&config).await?;
    components.probe().await;

    let cancel = CancellationToken::new();
    let probe_task = match config.sync.probe_interval() {
        Some(every) => Some(components.connectivity.spawn_probe(
            components.remote.clone(),
            every,
            cancel.clone(),
        )),
        None => {
            warn!("connectivity probe disabled (probe_interval_secs = 0)");
            None
        }
    };

    // Prometheus metrics, fed from the status subscriptions
    let mut registry = crate::metrics::Registry::default();
    let metrics = SyncMetrics::register(&mut registry);
    let _subscriptions = metrics.attach(&components.queue, &components.orchestrator);
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let state = HealthState {
            registry: Arc::new(registry),
            remote: components.remote.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    components.orchestrator.start();

    // catch up right away instead of waiting a full interval
    let orchestrator = components.orchestrator.clone();
    tokio::spawn(async move {
        let result = orchestrator.perform_full_sync().await;
        if !result.success {
            warn!(errors = ?result.errors, "startup sync incomplete");
        }
    });

    notify_ready();
    wait_for_shutdown().await?;
    info!("shutdown requested");

    cancel.cancel();
    if let Some(task) = probe_task {
        let _ = task.await;
    }
    components.orchestrator.shutdown().await;

    info!("daemon stopped");
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
    Ok(())
}

fn notify_ready() {
    // sd_notify(READY=1); no-op outside systemd
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &std::path::Path) -> TillConfig {
        let mut config = TillConfig::default();
        config.storage.data_dir = dir.to_path_buf();
        // nothing listens here
        config.storage.remote_url = "http://127.0.0.1:9/api".into();
        config.storage.request_timeout_secs = 1;
        config
    }

    #[tokio::test]
    async fn components_open_on_fresh_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let components = Components::open(&config_in(tmp.path())).await.unwrap();

        assert!(!components.connectivity.is_online());
        assert_eq!(components.queue.stats().total, 0);
        assert!(components.metadata.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_remote_probes_offline() {
        let tmp = tempfile::tempdir().unwrap();
        let components = Components::open(&config_in(tmp.path())).await.unwrap();

        assert!(!components.probe().await);
        let result = components.orchestrator.perform_full_sync().await;
        assert!(!result.success);
    }
}
