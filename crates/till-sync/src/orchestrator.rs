//! Bidirectional sync between the local store and the central store.
//!
//! A full sync drains the operation queue, then runs one push pass
//! (local → remote) and one pull pass (remote → local) per entity type.
//! Each pass reads records changed since that direction's watermark,
//! reconciles them one at a time against the destination, and advances the
//! watermark to the moment the pass started.
//!
//! Failures never escape [`SyncOrchestrator::perform_full_sync`]: a bad
//! record is skipped, a failed table is reported in [`SyncResult::errors`]
//! and the remaining tables still run.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use till_core::config::{MissingTimestampPolicy, TillConfig};
use till_core::{EntityType, Record};
use till_store::{RecordStore, RemoteError, StoreError, StoreResult};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conflict::{
    compare, conflict_record, resolve_with, ConflictResolver, LastWriterWins, RecordAction,
};
use crate::connectivity::ConnectivityMonitor;
use crate::listeners::{Listeners, Subscription};
use crate::metadata::{Direction, MetadataStore};
use crate::queue::OperationQueue;
use crate::single_flight::SingleFlight;

pub const ALREADY_IN_PROGRESS: &str = "sync already in progress";
pub const OFFLINE: &str = "offline: central store unreachable";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncResult {
    pub success: bool,
    /// Table passes completed, one per entity type and direction
    pub tables_processed: usize,
    pub records_synced: usize,
    pub conflicts: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn already_in_progress() -> Self {
        Self {
            success: false,
            errors: vec![ALREADY_IN_PROGRESS.to_string()],
            ..Default::default()
        }
    }

    pub fn offline() -> Self {
        Self {
            success: false,
            errors: vec![OFFLINE.to_string()],
            ..Default::default()
        }
    }

    fn merge(&mut self, other: SyncResult) {
        self.tables_processed += other.tables_processed;
        self.records_synced += other.records_synced;
        self.conflicts += other.conflicts;
        self.errors.extend(other.errors);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_operations: usize,
    pub errors: Vec<String>,
    pub last_result: Option<SyncResult>,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub entities: Vec<EntityType>,
    pub interval: Duration,
    pub settle_delay: Duration,
    pub request_timeout: Duration,
    pub missing_timestamp: MissingTimestampPolicy,
}

impl SyncOptions {
    pub fn from_config(config: &TillConfig) -> Self {
        Self {
            entities: config.sync.entities.clone(),
            interval: config.sync.interval(),
            settle_delay: config.sync.settle_delay(),
            request_timeout: config.storage.request_timeout(),
            missing_timestamp: config.sync.missing_timestamp,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&TillConfig::default())
    }
}

/// Collaborators the orchestrator drives.
pub struct SyncParts {
    pub local: Arc<dyn RecordStore>,
    pub remote: Arc<dyn RecordStore>,
    pub queue: OperationQueue,
    pub metadata: MetadataStore,
    pub connectivity: ConnectivityMonitor,
}

#[derive(Debug, Default)]
struct TableOutcome {
    records_synced: usize,
    conflicts: usize,
    skipped: Vec<String>,
}

enum RecordOutcome {
    Written,
    Resolved,
    Unchanged,
}

struct OrchestratorInner {
    local: Arc<dyn RecordStore>,
    remote: Arc<dyn RecordStore>,
    queue: OperationQueue,
    metadata: MetadataStore,
    connectivity: ConnectivityMonitor,
    options: SyncOptions,
    resolver: Arc<dyn ConflictResolver>,
    flight: SingleFlight<SyncResult>,
    status: Mutex<SyncStatus>,
    listeners: Listeners<SyncStatus>,
    queue_subscription: Mutex<Option<Subscription>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// Handle to the orchestrator; clones share the same state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl SyncOrchestrator {
    pub fn new(parts: SyncParts, options: SyncOptions) -> Self {
        Self::with_resolver(parts, options, Arc::new(LastWriterWins))
    }

    pub fn with_resolver(
        parts: SyncParts,
        options: SyncOptions,
        resolver: Arc<dyn ConflictResolver>,
    ) -> Self {
        let status = SyncStatus {
            is_online: parts.connectivity.is_online(),
            pending_operations: parts.queue.stats().pending,
            ..Default::default()
        };
        let inner = Arc::new(OrchestratorInner {
            local: parts.local,
            remote: parts.remote,
            queue: parts.queue,
            metadata: parts.metadata,
            connectivity: parts.connectivity,
            options,
            resolver,
            flight: SingleFlight::new(),
            status: Mutex::new(status),
            listeners: Listeners::new(),
            queue_subscription: Mutex::new(None),
            scheduler: Mutex::new(None),
            cancel: CancellationToken::new(),
        });

        // Weak: the queue's listener must not keep the orchestrator alive
        let weak = Arc::downgrade(&inner);
        let subscription = inner.queue.subscribe(move |stats| {
            if let Some(inner) = weak.upgrade() {
                inner.update_status(|s| s.pending_operations = stats.pending);
            }
        });
        *inner.queue_subscription.lock().unwrap() = Some(subscription);

        Self { inner }
    }

    /// Drain the queue, then push and pull every entity type.
    ///
    /// Returns immediately with an "already in progress" result if another
    /// full sync is running.
    pub async fn perform_full_sync(&self) -> SyncResult {
        let inner = Arc::clone(&self.inner);
        match self.inner.flight.try_run(move || inner.full_sync()) {
            Some(run) => run.await,
            None => {
                debug!("full sync requested while one is running");
                SyncResult::already_in_progress()
            }
        }
    }

    /// Push local changes for every entity type.
    pub async fn sync_to_cloud(&self) -> SyncResult {
        self.one_way(Direction::Push).await
    }

    /// Pull remote changes for every entity type.
    pub async fn sync_from_cloud(&self) -> SyncResult {
        self.one_way(Direction::Pull).await
    }

    /// One-way passes share the full sync's slot; both rewrite the same
    /// watermark rows.
    async fn one_way(&self, direction: Direction) -> SyncResult {
        let inner = Arc::clone(&self.inner);
        let run = self
            .inner
            .flight
            .try_run(move || async move { inner.sync_direction(direction).await });
        match run {
            Some(run) => run.await,
            None => {
                debug!(%direction, "one-way sync requested while a sync is running");
                SyncResult::already_in_progress()
            }
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.flight.is_running()
    }

    pub fn status(&self) -> SyncStatus {
        let mut status = self.inner.status.lock().unwrap().clone();
        status.is_online = self.inner.connectivity.is_online();
        status
    }

    /// Invoke `listener` now with the current status and on every transition.
    pub fn subscribe_sync_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        inner.listeners.subscribe(
            || {
                let mut status = inner.status.lock().unwrap();
                status.is_online = inner.connectivity.is_online();
                status.clone()
            },
            listener,
        )
    }

    /// Forget every watermark so the next passes rescan from the epoch.
    ///
    /// Waits for a sync in flight, then holds the sync slot while resetting.
    pub async fn reset_watermarks(&self) -> anyhow::Result<()> {
        let result = loop {
            let inner = Arc::clone(&self.inner);
            let reset = self.inner.flight.try_run(move || async move {
                match inner.metadata.reset_all().await {
                    Ok(()) => SyncResult {
                        success: true,
                        ..Default::default()
                    },
                    Err(e) => SyncResult {
                        errors: vec![format!("resetting watermarks: {e:#}")],
                        ..Default::default()
                    },
                }
            });
            match reset {
                Some(run) => break run.await,
                None => {
                    if let Some(running) = self.inner.flight.current() {
                        running.await;
                    }
                }
            }
        };
        if let Some(error) = result.errors.into_iter().next() {
            return Err(anyhow!(error));
        }
        info!("all watermarks reset");
        Ok(())
    }

    /// Spawn the scheduler: a full sync every interval while online, and one
    /// after each offline → online transition once the settle delay passes.
    pub fn start(&self) {
        let mut scheduler = self.inner.scheduler.lock().unwrap();
        if scheduler.is_some() || self.inner.cancel.is_cancelled() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *scheduler = Some(tokio::spawn(inner.run_scheduler()));
        info!(
            interval_secs = self.inner.options.interval.as_secs(),
            settle_ms = self.inner.options.settle_delay.as_millis() as u64,
            "sync scheduler started"
        );
    }

    /// Stop the scheduler and the queue's retry timer. A sync already in
    /// flight is allowed to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let scheduler = self.inner.scheduler.lock().unwrap().take();
        if let Some(task) = scheduler {
            let _ = task.await;
        }
        self.inner.queue.shutdown();
        if let Some(running) = self.inner.flight.current() {
            running.await;
        }
        info!("sync orchestrator stopped");
    }
}

impl OrchestratorInner {
    /// Mutate the status and notify subscribers once the lock is released.
    fn update_status(&self, f: impl FnOnce(&mut SyncStatus)) {
        self.listeners.publish(|| {
            let mut status = self.status.lock().unwrap();
            f(&mut status);
            status.is_online = self.connectivity.is_online();
            status.clone()
        });
    }

    fn trigger(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        if self.flight.try_run(move || inner.full_sync()).is_none() {
            debug!("scheduled sync skipped: one is already running");
        }
    }

    async fn run_scheduler(self: Arc<Self>) {
        let interval = self.options.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut online_rx = self.connectivity.watch();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.connectivity.is_online() {
                        debug!("periodic sync");
                        self.trigger();
                    }
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    self.update_status(|_| {});
                    if !online {
                        continue;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.options.settle_delay) => {}
                    }
                    if self.connectivity.is_online() {
                        info!("connectivity restored, syncing");
                        self.trigger();
                    } else {
                        debug!("connection dropped during settle delay, sync skipped");
                    }
                }
            }
        }
        debug!("sync scheduler stopped");
    }

    async fn full_sync(self: Arc<Self>) -> SyncResult {
        if !self.connectivity.is_online() {
            let result = SyncResult::offline();
            let errors = result.errors.clone();
            self.update_status(|s| s.errors = errors);
            info!("full sync skipped: offline");
            return result;
        }

        self.update_status(|s| {
            s.is_syncing = true;
            s.errors.clear();
        });
        info!("full sync started");

        let drain = self.queue.drain().await;
        let mut result = SyncResult::default();
        if drain.interrupted {
            result
                .errors
                .push("queue drain interrupted: connectivity lost".to_string());
        }

        result.merge(self.sync_direction(Direction::Push).await);
        result.merge(self.sync_direction(Direction::Pull).await);
        result.success = result.errors.is_empty();

        info!(
            success = result.success,
            tables = result.tables_processed,
            records = result.records_synced,
            conflicts = result.conflicts,
            errors = result.errors.len(),
            "full sync finished"
        );

        let pending = self.queue.stats().pending;
        let finished = result.clone();
        self.update_status(move |s| {
            s.is_syncing = false;
            s.last_sync_at = Some(Utc::now());
            s.pending_operations = pending;
            s.errors = finished.errors.clone();
            s.last_result = Some(finished);
        });
        result
    }

    async fn sync_direction(&self, direction: Direction) -> SyncResult {
        let mut result = SyncResult::default();
        for &entity in &self.options.entities {
            if !self.connectivity.is_online() {
                result
                    .errors
                    .push(format!("{entity} {direction}: skipped, offline"));
                continue;
            }
            match self.sync_table(entity, direction).await {
                Ok(outcome) => {
                    result.tables_processed += 1;
                    result.records_synced += outcome.records_synced;
                    result.conflicts += outcome.conflicts;
                    result.errors.extend(outcome.skipped);
                }
                Err(e) => {
                    warn!(entity = %entity, %direction, "table sync failed: {e:#}");
                    result.errors.push(format!("{entity} {direction}: {e:#}"));
                }
            }
        }
        result.success = result.errors.is_empty();
        result
    }

    fn stores(&self, direction: Direction) -> (&dyn RecordStore, &dyn RecordStore) {
        match direction {
            Direction::Push => (&*self.local, &*self.remote),
            Direction::Pull => (&*self.remote, &*self.local),
        }
    }

    async fn timed<T>(&self, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        let timeout = self.options.request_timeout;
        tokio::time::timeout(timeout, fut)
            .await
            .unwrap_or(Err(StoreError::Remote(RemoteError::Timeout(timeout))))
    }

    async fn sync_table(
        &self,
        entity: EntityType,
        direction: Direction,
    ) -> anyhow::Result<TableOutcome> {
        let pass_start = Utc::now();
        let mut watermark = self
            .metadata
            .get_or_default(entity)
            .await
            .context("reading watermark")?;
        let window = watermark.window_start(direction);
        let (source, _) = self.stores(direction);

        let changed = self
            .timed(source.modified_since(entity, window))
            .await
            .context("fetching changes")?;
        debug!(entity = %entity, %direction, count = changed.len(), since = %window, "changes fetched");

        let mut outcome = TableOutcome::default();
        for record in &changed {
            match self.sync_record(entity, direction, record, window).await {
                Ok(RecordOutcome::Written) => outcome.records_synced += 1,
                Ok(RecordOutcome::Resolved) => {
                    outcome.records_synced += 1;
                    outcome.conflicts += 1;
                }
                Ok(RecordOutcome::Unchanged) => {}
                Err(e) if e.is_fatal() => {
                    // watermark stays put so the next pass retries this window
                    return Err(anyhow!(e).context(format!("record {}", record.id)));
                }
                Err(e) => {
                    warn!(entity = %entity, %direction, id = %record.id, "record skipped: {e}");
                    outcome
                        .skipped
                        .push(format!("{entity} {direction}: record {} skipped: {e}", record.id));
                }
            }
        }

        watermark.advance(direction, pass_start, outcome.conflicts as u64);
        self.metadata
            .put(&watermark)
            .await
            .context("writing watermark")?;

        info!(
            entity = %entity,
            %direction,
            records = outcome.records_synced,
            conflicts = outcome.conflicts,
            skipped = outcome.skipped.len(),
            "table pass complete"
        );
        Ok(outcome)
    }

    async fn sync_record(
        &self,
        entity: EntityType,
        direction: Direction,
        record: &Record,
        window: DateTime<Utc>,
    ) -> StoreResult<RecordOutcome> {
        let (source, destination) = self.stores(direction);
        let existing = self.timed(destination.get(entity, &record.id)).await?;

        let action = compare(
            entity,
            record,
            existing.as_ref(),
            window,
            self.options.missing_timestamp,
        );
        match (action, existing) {
            (RecordAction::Unchanged, _) => Ok(RecordOutcome::Unchanged),
            (RecordAction::Conflict, Some(current)) => {
                let (local, remote) = match direction {
                    Direction::Push => (record, &current),
                    Direction::Pull => (&current, record),
                };
                let conflict = conflict_record(entity, local, remote);
                let (resolution, resolved) =
                    resolve_with(self.resolver.as_ref(), &conflict, Utc::now());
                info!(
                    entity = %entity,
                    id = %record.id,
                    ?resolution,
                    fields = ?conflict.differing_fields,
                    "conflict resolved"
                );
                // both sides get the stamped winner so the next pass sees
                // identical copies instead of the same conflict again
                self.timed(destination.put(entity, &resolved)).await?;
                self.timed(source.put(entity, &resolved)).await?;
                Ok(RecordOutcome::Resolved)
            }
            _ => {
                self.timed(destination.put(entity, record)).await?;
                debug!(entity = %entity, %direction, id = %record.id, "record written");
                Ok(RecordOutcome::Written)
            }
        }
    }
}
