//! till-sync: offline-first sync engine
//!
//! The [`OperationQueue`] captures every local mutation durably and replays it
//! against the central store when connectivity allows. The
//! [`SyncOrchestrator`] drains the queue, then reconciles each table in both
//! directions using per-table watermarks, resolving concurrent edits with
//! last-writer-wins.

pub mod backoff;
pub mod conflict;
pub mod connectivity;
pub mod listeners;
pub mod metadata;
pub mod orchestrator;
pub mod queue;
pub mod single_flight;

pub use connectivity::ConnectivityMonitor;
pub use listeners::Subscription;
pub use metadata::{MetadataStore, SyncWatermark};
pub use orchestrator::{SyncOrchestrator, SyncResult, SyncStatus};
pub use queue::{EnqueueRequest, OperationQueue, QueueStats, QueuedOperation};
