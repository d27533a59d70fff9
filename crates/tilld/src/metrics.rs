//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  - Prometheus text format
//!   GET /healthz  - Liveness probe (always 200 if process is running)
//!   GET /readyz   - Readiness probe (200 if the central store answers)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use chrono::{DateTime, Utc};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry as PRegistry,
};
use std::sync::{Arc, Mutex};
use till_store::HealthCheck;
use till_sync::{OperationQueue, QueueStats, Subscription, SyncOrchestrator, SyncStatus};

pub type Registry = PRegistry;

/// Sync and queue metrics, updated from the status subscriptions.
#[derive(Clone, Default)]
pub struct SyncMetrics {
    queue_pending: Gauge,
    queue_failed: Gauge,
    online: Gauge,
    syncs: Family<Vec<(String, String)>, Counter>,
    records_synced: Counter,
    conflicts: Counter,
    /// `last_sync_at` of the last result counted
    counted: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl SyncMetrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "till_queue_pending",
            "Queued operations still eligible for replay",
            metrics.queue_pending.clone(),
        );
        registry.register(
            "till_queue_failed",
            "Queued operations that exhausted their attempts",
            metrics.queue_failed.clone(),
        );
        registry.register(
            "till_online",
            "1 while the central store is reachable",
            metrics.online.clone(),
        );
        registry.register(
            "till_syncs",
            "Completed full syncs by outcome",
            metrics.syncs.clone(),
        );
        registry.register(
            "till_records_synced",
            "Records written by sync passes",
            metrics.records_synced.clone(),
        );
        registry.register(
            "till_conflicts",
            "Conflicts resolved by sync passes",
            metrics.conflicts.clone(),
        );
        metrics
    }

    pub fn observe_queue(&self, stats: &QueueStats) {
        self.queue_pending.set(stats.pending as i64);
        self.queue_failed.set(stats.failed as i64);
    }

    /// Status notifications repeat; each finished sync is counted once.
    pub fn observe_status(&self, status: &SyncStatus) {
        self.online.set(i64::from(status.is_online));
        let Some(result) = &status.last_result else {
            return;
        };
        let mut counted = self.counted.lock().unwrap();
        if *counted == status.last_sync_at {
            return;
        }
        *counted = status.last_sync_at;

        let outcome = if result.success { "success" } else { "failure" };
        self.syncs
            .get_or_create(&vec![("outcome".to_string(), outcome.to_string())])
            .inc();
        self.records_synced.inc_by(result.records_synced as u64);
        self.conflicts.inc_by(result.conflicts as u64);
    }

    /// Subscribe to the queue and the orchestrator. Metrics stop updating
    /// when the returned subscriptions are dropped.
    pub fn attach(
        &self,
        queue: &OperationQueue,
        orchestrator: &SyncOrchestrator,
    ) -> Vec<Subscription> {
        let on_queue = self.clone();
        let on_status = self.clone();
        vec![
            queue.subscribe(move |stats| on_queue.observe_queue(stats)),
            orchestrator.subscribe_sync_status(move |status| on_status.observe_status(status)),
        ]
    }
}

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub remote: Arc<dyn HealthCheck>,
}

fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9200")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// 200 if the central store answers its health check, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    match state.remote.check().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "central store unreachable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use till_sync::SyncResult;

    fn finished(at: DateTime<Utc>, success: bool, records: usize) -> SyncStatus {
        SyncStatus {
            is_online: true,
            last_sync_at: Some(at),
            last_result: Some(SyncResult {
                success,
                tables_processed: 8,
                records_synced: records,
                conflicts: 1,
                errors: vec![],
            }),
            ..Default::default()
        }
    }

    fn render(registry: &Registry) -> String {
        let mut body = String::new();
        encode(&mut body, registry).unwrap();
        body
    }

    #[test]
    fn each_sync_is_counted_once() {
        let mut registry = Registry::default();
        let metrics = SyncMetrics::register(&mut registry);

        let at = Utc::now();
        let status = finished(at, true, 3);
        metrics.observe_status(&status);
        // same sync, re-notified after a queue change
        metrics.observe_status(&SyncStatus {
            pending_operations: 2,
            ..status
        });
        metrics.observe_status(&finished(at + chrono::Duration::seconds(1), false, 2));

        let body = render(&registry);
        assert!(body.contains("till_syncs_total{outcome=\"success\"} 1"), "{body}");
        assert!(body.contains("till_syncs_total{outcome=\"failure\"} 1"), "{body}");
        assert!(body.contains("till_records_synced_total 5"), "{body}");
        assert!(body.contains("till_conflicts_total 2"), "{body}");
        assert!(body.contains("till_online 1"), "{body}");
    }

    #[test]
    fn queue_gauges_follow_stats() {
        let mut registry = Registry::default();
        let metrics = SyncMetrics::register(&mut registry);
        metrics.observe_queue(&QueueStats {
            total: 4,
            pending: 3,
            failed: 1,
        });
        let body = render(&registry);
        assert!(body.contains("till_queue_pending 3"), "{body}");
        assert!(body.contains("till_queue_failed 1"), "{body}");
    }
}
