//! Online/offline state shared by the queue and the orchestrator.

use std::sync::Arc;
use std::time::Duration;
use till_store::HealthCheck;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cheap-to-clone handle over a watch channel holding the current state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Update the state; subscribers are woken only on an actual change.
    /// Returns true when the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            if online {
                info!("connectivity: online");
            } else {
                warn!("connectivity: offline");
            }
        }
        changed
    }

    /// Receiver that observes every transition from now on.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Poll `probe` every `interval`, updating the state from its result,
    /// until `cancel` fires.
    pub fn spawn_probe(
        &self,
        probe: Arc<dyn HealthCheck>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match probe.check().await {
                            Ok(()) => {
                                monitor.set_online(true);
                            }
                            Err(e) => {
                                debug!("connectivity probe failed: {e}");
                                monitor.set_online(false);
                            }
                        }
                    }
                }
            }
            debug!("connectivity probe stopped");
        })
    }
}
