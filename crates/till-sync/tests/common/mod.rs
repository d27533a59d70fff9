//! Shared fixtures for till-sync integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use till_core::types::Product;
use till_core::{EntityPayload, EntityType, Record};
use till_store::{
    MemoryStore, Mutation, RecordStore, RemoteError, RemoteExecutor, StoreError, StoreResult,
};
use till_sync::backoff::Backoff;
use till_sync::orchestrator::{SyncOptions, SyncParts};
use till_sync::queue::QueueOptions;
use till_sync::{ConnectivityMonitor, MetadataStore, OperationQueue, SyncOrchestrator};
use tokio::sync::{Notify, Semaphore};

pub fn memory_operator() -> opendal::Operator {
    opendal::Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

pub fn product(id: &str, price: i64, modified_at: Option<DateTime<Utc>>) -> EntityPayload {
    EntityPayload::Product(Product {
        id: id.into(),
        sku: format!("SKU-{id}"),
        name: format!("Product {id}"),
        category_id: None,
        price,
        active: true,
        modified_at,
    })
}

pub fn product_record(id: &str, price: i64, modified_at: Option<DateTime<Utc>>) -> Record {
    product(id, price, modified_at)
        .to_record()
        .expect("product record")
}

/// Queue options with no backoff delay, so retries are immediately eligible.
pub fn eager_options() -> QueueOptions {
    QueueOptions {
        default_max_attempts: 5,
        backoff: Backoff::new(Duration::ZERO, Duration::ZERO, 0.0),
        fail_fast_on_rejection: true,
        request_timeout: Duration::from_secs(5),
    }
}

// ── Mock remote executor ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accept,
    Transient,
    Reject,
    /// Never answers
    Hang,
}

/// Scripted executor that records every call it receives.
pub struct MockRemote {
    log: Mutex<Vec<(String, Outcome)>>,
    script: Mutex<VecDeque<Outcome>>,
    default: Mutex<Outcome>,
    gate: Semaphore,
    /// Notified as each call arrives, before it waits on the gate
    pub entered: Notify,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// Calls are logged but held until [`MockRemote::release`].
    pub fn gated() -> Arc<Self> {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            default: Mutex::new(Outcome::Accept),
            gate: Semaphore::new(permits),
            entered: Notify::new(),
        })
    }

    pub fn release(&self) {
        self.gate.add_permits(1_000);
    }

    /// Outcome for every call once the script is exhausted.
    pub fn set_default(&self, outcome: Outcome) {
        *self.default.lock().unwrap() = outcome;
    }

    /// Outcomes for the next calls, in order.
    pub fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.script.lock().unwrap().extend(outcomes);
    }

    /// Record ids of every call, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
    }

    /// Record ids the remote accepted, in call order.
    pub fn delivered(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, o)| *o == Outcome::Accept)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteExecutor for MockRemote {
    async fn execute(&self, mutation: &Mutation) -> Result<(), RemoteError> {
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(*self.default.lock().unwrap());
        self.log
            .lock()
            .unwrap()
            .push((mutation.record.id.clone(), outcome));
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;

        match outcome {
            Outcome::Accept => Ok(()),
            Outcome::Hang => std::future::pending().await,
            Outcome::Transient => Err(RemoteError::Transient {
                status: 503,
                message: "service unavailable".into(),
            }),
            Outcome::Reject => Err(RemoteError::Rejected {
                status: Some(422),
                message: "validation failed".into(),
            }),
        }
    }
}

// ── Store wrappers ────────────────────────────────────────────────────────────

/// Counts delta reads and can hold them until released.
pub struct GatedStore {
    inner: Arc<dyn RecordStore>,
    gate: Semaphore,
    pub entered: Notify,
    delta_calls: AtomicUsize,
}

impl GatedStore {
    pub fn open(inner: Arc<dyn RecordStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
            entered: Notify::new(),
            delta_calls: AtomicUsize::new(0),
        })
    }

    pub fn closed(inner: Arc<dyn RecordStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            gate: Semaphore::new(0),
            entered: Notify::new(),
            delta_calls: AtomicUsize::new(0),
        })
    }

    pub fn release(&self) {
        self.gate.add_permits(1_000);
    }

    pub fn delta_calls(&self) -> usize {
        self.delta_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for GatedStore {
    async fn get(&self, entity: EntityType, id: &str) -> StoreResult<Option<Record>> {
        self.inner.get(entity, id).await
    }

    async fn put(&self, entity: EntityType, record: &Record) -> StoreResult<()> {
        self.inner.put(entity, record).await
    }

    async fn delete(&self, entity: EntityType, id: &str) -> StoreResult<bool> {
        self.inner.delete(entity, id).await
    }

    async fn modified_since(
        &self,
        entity: EntityType,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Record>> {
        self.delta_calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.inner.modified_since(entity, since).await
    }
}

/// Injected failure for one entity type.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Delta reads fail as if the store were down
    DeltaUnavailable,
    /// Every write fails as if the store were down
    WriteUnavailable,
    /// Writes of this record id fail on their own
    RejectRecord(String),
}

pub struct FlakyStore {
    pub inner: MemoryStore,
    faults: Mutex<HashMap<EntityType, Fault>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            faults: Mutex::new(HashMap::new()),
        })
    }

    pub fn inject(&self, entity: EntityType, fault: Fault) {
        self.faults.lock().unwrap().insert(entity, fault);
    }

    fn fault(&self, entity: EntityType) -> Option<Fault> {
        self.faults.lock().unwrap().get(&entity).cloned()
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn get(&self, entity: EntityType, id: &str) -> StoreResult<Option<Record>> {
        self.inner.get(entity, id).await
    }

    async fn put(&self, entity: EntityType, record: &Record) -> StoreResult<()> {
        match self.fault(entity) {
            Some(Fault::WriteUnavailable) => {
                Err(StoreError::Unavailable("disk full".into()))
            }
            Some(Fault::RejectRecord(id)) if id == record.id => {
                Err(StoreError::record(&record.id, "constraint violated"))
            }
            _ => self.inner.put(entity, record).await,
        }
    }

    async fn delete(&self, entity: EntityType, id: &str) -> StoreResult<bool> {
        self.inner.delete(entity, id).await
    }

    async fn modified_since(
        &self,
        entity: EntityType,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Record>> {
        match self.fault(entity) {
            Some(Fault::DeltaUnavailable) => {
                Err(StoreError::Unavailable("connection reset".into()))
            }
            _ => self.inner.modified_since(entity, since).await,
        }
    }
}

// ── Orchestrator harness ──────────────────────────────────────────────────────

pub struct Harness {
    pub orchestrator: SyncOrchestrator,
    pub queue: OperationQueue,
    pub metadata: MetadataStore,
    pub connectivity: ConnectivityMonitor,
    pub executor: Arc<MockRemote>,
}

pub async fn harness(
    local: Arc<dyn RecordStore>,
    remote: Arc<dyn RecordStore>,
    online: bool,
) -> Harness {
    let state = memory_operator();
    let connectivity = ConnectivityMonitor::new(online);
    let executor = MockRemote::new();
    let queue = OperationQueue::open(
        state.clone(),
        executor.clone(),
        connectivity.clone(),
        eager_options(),
    )
    .await
    .expect("open queue");
    let metadata = MetadataStore::new(state);

    let orchestrator = SyncOrchestrator::new(
        SyncParts {
            local,
            remote,
            queue: queue.clone(),
            metadata: metadata.clone(),
            connectivity: connectivity.clone(),
        },
        SyncOptions {
            request_timeout: Duration::from_secs(5),
            ..SyncOptions::default()
        },
    );

    Harness {
        orchestrator,
        queue,
        metadata,
        connectivity,
        executor,
    }
}
