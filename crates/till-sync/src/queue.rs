//! Durable operation queue.
//!
//! Every local mutation is recorded here before the caller gets an id back,
//! and stays until the central store accepts it or an operator explicitly
//! clears it. Operations that exhaust their attempt budget are kept as
//! "failed" rather than dropped.
//!
//! The whole queue is persisted as one JSON array under [`QUEUE_KEY`] after
//! every change.

use chrono::{DateTime, Utc};
use opendal::{ErrorKind, Operator};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use till_core::config::{QueueConfig, StorageConfig};
use till_core::{EntityPayload, EntityType, OperationKind, TillError, TillResult};
use till_store::{Mutation, RemoteError, RemoteExecutor};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::connectivity::ConnectivityMonitor;
use crate::listeners::{Listeners, Subscription};
use crate::single_flight::SingleFlight;

pub const QUEUE_KEY: &str = "operation_queue.json";

// ── Operations ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: String,
    /// Insertion counter, breaks ties between equal priority and timestamp
    pub seq: u64,
    pub kind: OperationKind,
    pub entity_type: EntityType,
    pub payload: EntityPayload,
    pub enqueued_at: DateTime<Utc>,
    pub attempt_count: u32,
    pub attempt_limit: u32,
    /// Higher runs sooner
    pub priority: i32,
    /// Operations that must leave the queue before this one may run
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueuedOperation {
    pub fn is_failed(&self) -> bool {
        self.attempt_count >= self.attempt_limit
    }

    pub fn is_pending(&self) -> bool {
        !self.is_failed()
    }

    pub fn to_mutation(&self) -> TillResult<Mutation> {
        Ok(Mutation {
            kind: self.kind,
            entity: self.entity_type,
            record: self.payload.to_record()?,
        })
    }
}

/// Drain order: priority desc, then enqueue time, then insertion order.
fn drain_order(a: &QueuedOperation, b: &QueuedOperation) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
        .then_with(|| a.seq.cmp(&b.seq))
}

#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub kind: OperationKind,
    pub entity_type: EntityType,
    pub payload: EntityPayload,
    pub priority: i32,
    /// Falls back to the queue's configured default
    pub max_attempts: Option<u32>,
    pub depends_on: BTreeSet<String>,
}

impl EnqueueRequest {
    pub fn new(kind: OperationKind, entity_type: EntityType, payload: EntityPayload) -> Self {
        Self {
            kind,
            entity_type,
            payload,
            priority: 0,
            max_attempts: None,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub failed: usize,
}

impl QueueStats {
    fn of(operations: &[QueuedOperation]) -> Self {
        let failed = operations.iter().filter(|o| o.is_failed()).count();
        Self {
            total: operations.len(),
            pending: operations.len() - failed,
            failed,
        }
    }
}

/// Outcome of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Waiting on a dependency or a backoff deadline
    pub blocked: usize,
    /// Not started because the monitor reported offline
    pub offline: bool,
    /// Connectivity dropped part-way through
    pub interrupted: bool,
    pub remaining: usize,
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub default_max_attempts: u32,
    pub backoff: Backoff,
    pub fail_fast_on_rejection: bool,
    pub request_timeout: Duration,
}

impl QueueOptions {
    pub fn from_config(queue: &QueueConfig, storage: &StorageConfig) -> Self {
        Self {
            default_max_attempts: queue.default_max_attempts.max(1),
            backoff: Backoff::from_config(queue),
            fail_fast_on_rejection: queue.fail_fast_on_rejection,
            request_timeout: storage.request_timeout(),
        }
    }
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default(), &StorageConfig::default())
    }
}

// ── Queue ─────────────────────────────────────────────────────────────────────

struct QueueState {
    operations: Vec<QueuedOperation>,
    next_seq: u64,
}

impl QueueState {
    fn find_mut(&mut self, id: &str) -> Option<&mut QueuedOperation> {
        self.operations.iter_mut().find(|o| o.id == id)
    }

    fn contains(&self, id: &str) -> bool {
        self.operations.iter().any(|o| o.id == id)
    }
}

enum Readiness {
    Gone,
    Blocked,
    Ready(Box<QueuedOperation>),
}

struct QueueInner {
    op: Operator,
    executor: Arc<dyn RemoteExecutor>,
    connectivity: ConnectivityMonitor,
    options: QueueOptions,
    state: tokio::sync::Mutex<QueueState>,
    drain: SingleFlight<DrainReport>,
    /// Set when a drain was requested while one was already running
    rerun: AtomicBool,
    stats: Mutex<QueueStats>,
    listeners: Listeners<QueueStats>,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

/// Handle to the queue; clones share the same state.
#[derive(Clone)]
pub struct OperationQueue {
    inner: Arc<QueueInner>,
}

impl OperationQueue {
    /// Load the persisted queue from `op` (empty if none was saved yet).
    pub async fn open(
        op: Operator,
        executor: Arc<dyn RemoteExecutor>,
        connectivity: ConnectivityMonitor,
        options: QueueOptions,
    ) -> TillResult<Self> {
        let mut operations: Vec<QueuedOperation> = match op.read(QUEUE_KEY).await {
            Ok(buf) => serde_json::from_slice(&buf.to_vec())?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(TillError::Storage(format!("reading {QUEUE_KEY}: {e}"))),
        };
        operations.sort_by(drain_order);
        let next_seq = operations.iter().map(|o| o.seq + 1).max().unwrap_or(0);
        let stats = QueueStats::of(&operations);
        info!(
            total = stats.total,
            failed = stats.failed,
            "operation queue loaded"
        );

        Ok(Self {
            inner: Arc::new(QueueInner {
                op,
                executor,
                connectivity,
                options,
                state: tokio::sync::Mutex::new(QueueState {
                    operations,
                    next_seq,
                }),
                drain: SingleFlight::new(),
                rerun: AtomicBool::new(false),
                stats: Mutex::new(stats),
                listeners: Listeners::new(),
                retry_timer: Mutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    /// Record a mutation durably and return its id.
    ///
    /// Succeeds offline. When online a drain is started in the background;
    /// the caller does not wait for it.
    pub async fn enqueue(&self, request: EnqueueRequest) -> TillResult<String> {
        let inner = &self.inner;
        if request.payload.entity_type() != request.entity_type {
            return Err(TillError::InvalidOperation(format!(
                "{} payload enqueued as {}",
                request.payload.entity_type(),
                request.entity_type
            )));
        }
        let attempt_limit = request
            .max_attempts
            .unwrap_or(inner.options.default_max_attempts);
        if attempt_limit == 0 {
            return Err(TillError::InvalidOperation(
                "max_attempts must be at least 1".into(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        {
            let mut state = inner.state.lock().await;
            let operation = QueuedOperation {
                id: id.clone(),
                seq: state.next_seq,
                kind: request.kind,
                entity_type: request.entity_type,
                payload: request.payload,
                enqueued_at: Utc::now(),
                attempt_count: 0,
                attempt_limit,
                priority: request.priority,
                depends_on: request.depends_on,
                next_attempt_at: None,
                last_error: None,
            };
            state.operations.push(operation);
            if let Err(e) = inner.persist(&state.operations).await {
                state.operations.pop();
                return Err(e);
            }
            state.next_seq += 1;
            inner.publish(&state);
        }

        info!(
            op_id = %id,
            kind = %request.kind,
            entity = %request.entity_type,
            priority = request.priority,
            "operation enqueued"
        );
        inner.spawn_drain();
        Ok(id)
    }

    /// Remove an operation. Returns false if it was not queued.
    pub async fn dequeue(&self, id: &str) -> TillResult<bool> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let Some(pos) = state.operations.iter().position(|o| o.id == id) else {
            return Ok(false);
        };
        let removed = state.operations.remove(pos);
        if let Err(e) = inner.persist(&state.operations).await {
            state.operations.insert(pos, removed);
            return Err(e);
        }
        inner.publish(&state);
        debug!(op_id = %id, "operation dequeued");
        Ok(true)
    }

    /// Snapshot of every queued operation in drain order.
    pub async fn list_operations(&self) -> Vec<QueuedOperation> {
        let mut operations = self.inner.state.lock().await.operations.clone();
        operations.sort_by(drain_order);
        operations
    }

    pub fn stats(&self) -> QueueStats {
        *self.inner.stats.lock().unwrap()
    }

    /// Invoke `listener` now with the current stats and after every change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&QueueStats) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        inner
            .listeners
            .subscribe(|| *inner.stats.lock().unwrap(), listener)
    }

    /// Replay eligible operations against the remote.
    ///
    /// Only one drain runs at a time; concurrent callers await the drain
    /// already in flight and receive its report.
    pub async fn drain(&self) -> DrainReport {
        let inner = Arc::clone(&self.inner);
        self.inner.drain.run(move || inner.drain_pass()).await
    }

    pub fn is_draining(&self) -> bool {
        self.inner.drain.is_running()
    }

    /// Give every failed operation a fresh attempt budget.
    pub async fn retry_failed(&self) -> TillResult<usize> {
        let inner = &self.inner;
        let reset = {
            let mut state = inner.state.lock().await;
            let before = state.operations.clone();
            let mut reset = 0;
            for op in state.operations.iter_mut().filter(|o| o.is_failed()) {
                op.attempt_count = 0;
                op.next_attempt_at = None;
                reset += 1;
            }
            if reset > 0 {
                if let Err(e) = inner.persist(&state.operations).await {
                    state.operations = before;
                    return Err(e);
                }
                inner.publish(&state);
            }
            reset
        };
        if reset > 0 {
            info!(count = reset, "failed operations reset for retry");
            inner.spawn_drain();
        }
        Ok(reset)
    }

    /// Drop every queued operation without executing it.
    pub async fn clear(&self) -> TillResult<usize> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let dropped = std::mem::take(&mut state.operations);
        if let Err(e) = inner.persist(&state.operations).await {
            state.operations = dropped;
            return Err(e);
        }
        inner.publish(&state);
        warn!(count = dropped.len(), "operation queue cleared");
        Ok(dropped.len())
    }

    /// Cancel the retry timer and stop background drains.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(timer) = self.inner.retry_timer.lock().unwrap().take() {
            timer.abort();
        }
        debug!("operation queue shut down");
    }
}

impl QueueInner {
    async fn persist(&self, operations: &[QueuedOperation]) -> TillResult<()> {
        let bytes = serde_json::to_vec_pretty(operations)?;
        self.op
            .write(QUEUE_KEY, bytes)
            .await
            .map_err(|e| TillError::Storage(format!("writing {QUEUE_KEY}: {e}")))?;
        Ok(())
    }

    /// Refresh the stats snapshot and notify listeners. Called with the state
    /// lock held so listeners observe changes in order.
    fn publish(&self, state: &QueueState) {
        let stats = QueueStats::of(&state.operations);
        self.listeners.publish(|| {
            *self.stats.lock().unwrap() = stats;
            stats
        });
    }

    fn spawn_drain(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() || !self.connectivity.is_online() {
            return;
        }
        let inner = Arc::clone(self);
        if self.drain.try_run(move || inner.drain_pass()).is_some() {
            return;
        }

        // The running pass may already have collected its candidates. It
        // takes another round when it sees the flag; if it finished first,
        // start a fresh drain once it is gone.
        self.rerun.store(true, AtomicOrdering::SeqCst);
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(running) = inner.drain.current() {
                running.await;
            }
            if inner.rerun.swap(false, AtomicOrdering::SeqCst) {
                inner.spawn_drain();
            }
        });
    }

    fn readiness(state: &QueueState, id: &str, now: DateTime<Utc>) -> Readiness {
        let Some(op) = state.operations.iter().find(|o| o.id == id) else {
            return Readiness::Gone;
        };
        if op.is_failed() {
            return Readiness::Gone;
        }
        if op.next_attempt_at.is_some_and(|due| due > now)
            || op.depends_on.iter().any(|dep| state.contains(dep))
        {
            return Readiness::Blocked;
        }
        Readiness::Ready(Box::new(op.clone()))
    }

    async fn drain_pass(self: Arc<Self>) -> DrainReport {
        let mut report = DrainReport::default();
        if !self.connectivity.is_online() {
            report.offline = true;
            report.remaining = self.state.lock().await.operations.len();
            debug!("drain skipped: offline");
            return report;
        }

        'rounds: loop {
            self.rerun.store(false, AtomicOrdering::SeqCst);
            let candidates: Vec<String> = {
                let state = self.state.lock().await;
                let mut pending: Vec<&QueuedOperation> =
                    state.operations.iter().filter(|o| o.is_pending()).collect();
                pending.sort_by(|a, b| drain_order(a, b));
                pending.into_iter().map(|o| o.id.clone()).collect()
            };

            let mut progressed = false;
            let mut blocked = 0;
            for id in candidates {
                if !self.connectivity.is_online() {
                    report.interrupted = true;
                    warn!("connectivity lost, drain interrupted");
                    break 'rounds;
                }

                let operation = {
                    let state = self.state.lock().await;
                    match Self::readiness(&state, &id, Utc::now()) {
                        Readiness::Gone => continue,
                        Readiness::Blocked => {
                            blocked += 1;
                            continue;
                        }
                        Readiness::Ready(op) => op,
                    }
                };

                report.attempted += 1;
                match self.execute(&operation).await {
                    Ok(()) => {
                        report.succeeded += 1;
                        progressed = true;
                        self.complete(&operation).await;
                    }
                    Err(e) => {
                        report.failed += 1;
                        self.record_failure(&operation, &e).await;
                    }
                }
            }

            report.blocked = blocked;
            // a success may have released dependents that sorted earlier
            let released = progressed && blocked > 0;
            if !released && !self.rerun.load(AtomicOrdering::SeqCst) {
                break;
            }
        }

        let state = self.state.lock().await;
        report.remaining = state.operations.len();
        self.schedule_retry(&state);
        drop(state);

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            blocked = report.blocked,
            remaining = report.remaining,
            interrupted = report.interrupted,
            "queue drain finished"
        );
        report
    }

    async fn execute(&self, operation: &QueuedOperation) -> Result<(), RemoteError> {
        let mutation = operation.to_mutation().map_err(|e| RemoteError::Rejected {
            status: None,
            message: format!("unencodable payload: {e}"),
        })?;
        let timeout = self.options.request_timeout;
        debug!(op_id = %operation.id, kind = %operation.kind, entity = %operation.entity_type, "executing operation");
        tokio::time::timeout(timeout, self.executor.execute(&mutation))
            .await
            .unwrap_or(Err(RemoteError::Timeout(timeout)))
    }

    async fn complete(&self, operation: &QueuedOperation) {
        let mut state = self.state.lock().await;
        state.operations.retain(|o| o.id != operation.id);
        if let Err(e) = self.persist(&state.operations).await {
            // the remote already has it; a replay after restart is harmless
            error!(op_id = %operation.id, "persisting completed operation: {e}");
        }
        self.publish(&state);
        debug!(op_id = %operation.id, "operation applied");
    }

    async fn record_failure(&self, operation: &QueuedOperation, err: &RemoteError) {
        let mut state = self.state.lock().await;
        let options = &self.options;
        let Some(op) = state.find_mut(&operation.id) else {
            return;
        };

        op.attempt_count += 1;
        if err.is_permanent() && options.fail_fast_on_rejection {
            op.attempt_count = op.attempt_limit;
        }
        op.last_error = Some(err.to_string());

        if op.is_failed() {
            op.next_attempt_at = None;
            warn!(
                op_id = %op.id,
                attempt = op.attempt_count,
                limit = op.attempt_limit,
                "operation failed permanently: {err}"
            );
        } else {
            let delay = options.backoff.delay_with_jitter(op.attempt_count);
            let delay_td =
                chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            op.next_attempt_at = Some(Utc::now() + delay_td);
            warn!(
                op_id = %op.id,
                attempt = op.attempt_count,
                limit = op.attempt_limit,
                delay_ms = delay.as_millis() as u64,
                "operation failed, will retry: {err}"
            );
        }

        if let Err(e) = self.persist(&state.operations).await {
            error!(op_id = %operation.id, "persisting failed attempt: {e}");
        }
        self.publish(&state);
    }

    /// Arm a single timer for the earliest pending backoff deadline,
    /// replacing any timer already armed.
    fn schedule_retry(self: &Arc<Self>, state: &QueueState) {
        let mut timer = self.retry_timer.lock().unwrap();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        if self.shutdown.is_cancelled() {
            return;
        }
        let Some(due) = state
            .operations
            .iter()
            .filter(|o| o.is_pending())
            .filter_map(|o| o.next_attempt_at)
            .min()
        else {
            return;
        };

        let delay = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        debug!(delay_ms = delay.as_millis() as u64, "retry timer armed");

        let weak = Arc::downgrade(self);
        let cancel = self.shutdown.clone();
        *timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            // the drain that armed this timer may still be finishing
            if let Some(running) = inner.drain.current() {
                running.await;
            }
            inner.spawn_drain();
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use till_core::types::Category;
    use till_store::{memory_operator, MemoryStore, StoreExecutor};

    fn category(id: &str) -> EntityPayload {
        EntityPayload::Category(Category {
            id: id.into(),
            name: format!("Category {id}"),
            parent_id: None,
            modified_at: Some(Utc::now()),
        })
    }

    async fn queue(op: Operator, online: bool) -> (OperationQueue, Arc<MemoryStore>) {
        let remote = Arc::new(MemoryStore::new());
        let q = OperationQueue::open(
            op,
            Arc::new(StoreExecutor::new(remote.clone())),
            ConnectivityMonitor::new(online),
            QueueOptions::default(),
        )
        .await
        .unwrap();
        (q, remote)
    }

    #[tokio::test]
    async fn enqueue_persists_before_returning() {
        let op = memory_operator().unwrap();
        let (q, _) = queue(op.clone(), false).await;
        let id = q
            .enqueue(EnqueueRequest::new(
                OperationKind::Create,
                EntityType::Category,
                category("c1"),
            ))
            .await
            .unwrap();

        let saved: Vec<QueuedOperation> =
            serde_json::from_slice(&op.read(QUEUE_KEY).await.unwrap().to_vec()).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, id);

        // a second queue opened on the same storage sees it
        let (reopened, _) = queue(op, false).await;
        assert_eq!(reopened.stats().total, 1);
    }

    #[tokio::test]
    async fn mismatched_payload_is_rejected() {
        let (q, _) = queue(memory_operator().unwrap(), false).await;
        let err = q
            .enqueue(EnqueueRequest::new(
                OperationKind::Update,
                EntityType::Product,
                category("c1"),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, TillError::InvalidOperation(_)));
        assert_eq!(q.stats().total, 0);
    }

    #[tokio::test]
    async fn zero_attempts_is_rejected() {
        let (q, _) = queue(memory_operator().unwrap(), false).await;
        let request = EnqueueRequest::new(
            OperationKind::Create,
            EntityType::Category,
            category("c1"),
        )
        .with_max_attempts(0);
        assert!(q.enqueue(request).await.is_err());
    }

    #[tokio::test]
    async fn drain_offline_is_a_noop() {
        let (q, remote) = queue(memory_operator().unwrap(), false).await;
        q.enqueue(EnqueueRequest::new(
            OperationKind::Create,
            EntityType::Category,
            category("c1"),
        ))
        .await
        .unwrap();
        let report = q.drain().await;
        assert!(report.offline);
        assert_eq!(report.remaining, 1);
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn dependencies_run_first() {
        let (q, remote) = queue(memory_operator().unwrap(), false).await;
        let parent = q
            .enqueue(
                EnqueueRequest::new(OperationKind::Create, EntityType::Category, category("parent"))
                    .with_priority(0),
            )
            .await
            .unwrap();
        // the child sorts first but must wait for its parent
        q.enqueue(
            EnqueueRequest::new(OperationKind::Create, EntityType::Category, category("child"))
                .with_priority(10)
                .depends_on(parent),
        )
        .await
        .unwrap();

        q.inner.connectivity.set_online(true);
        let report = q.drain().await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.remaining, 0);
        assert_eq!(remote.len(EntityType::Category), 2);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let (q, _) = queue(memory_operator().unwrap(), false).await;
        for i in 0..3 {
            q.enqueue(EnqueueRequest::new(
                OperationKind::Create,
                EntityType::Category,
                category(&format!("c{i}")),
            ))
            .await
            .unwrap();
        }
        assert_eq!(q.clear().await.unwrap(), 3);
        assert_eq!(q.stats(), QueueStats::default());
        assert!(q.list_operations().await.is_empty());
    }

    #[tokio::test]
    async fn subscribe_replays_and_follows() {
        let (q, _) = queue(memory_operator().unwrap(), false).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sub = q.subscribe(move |stats| s.lock().unwrap().push(stats.total));

        q.enqueue(EnqueueRequest::new(
            OperationKind::Create,
            EntityType::Category,
            category("c1"),
        ))
        .await
        .unwrap();
        sub.unsubscribe();
        q.clear().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
    }

    #[test]
    fn drain_order_sorts_priority_then_age() {
        let now = Utc::now();
        let op = |id: &str, priority, seq| QueuedOperation {
            id: id.into(),
            seq,
            kind: OperationKind::Create,
            entity_type: EntityType::Category,
            payload: category(id),
            enqueued_at: now,
            attempt_count: 0,
            attempt_limit: 3,
            priority,
            depends_on: BTreeSet::new(),
            next_attempt_at: None,
            last_error: None,
        };
        let mut ops = vec![op("a", 1, 0), op("b", 5, 1), op("c", 1, 2)];
        ops.sort_by(drain_order);
        let ids: Vec<_> = ops.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }
}
