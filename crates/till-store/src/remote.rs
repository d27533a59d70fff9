//! Remote execution of queued mutations.

use async_trait::async_trait;
use till_core::{EntityType, OperationKind, Record};

use crate::error::RemoteError;
use crate::store::RecordStore;

/// HTTP verb a mutation maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Post,
    Put,
    Delete,
}

/// One mutation to replay against the central store.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub kind: OperationKind,
    pub entity: EntityType,
    pub record: Record,
}

impl Mutation {
    /// Verb and path relative to the remote base URL.
    ///
    /// create → `POST {base}`, update → `PUT {base}/{id}`,
    /// delete → `DELETE {base}/{id}`.
    pub fn route(&self) -> (Verb, String) {
        let base = self.entity.base_path();
        match self.kind {
            OperationKind::Create => (Verb::Post, base.to_string()),
            OperationKind::Update => (Verb::Put, format!("{base}/{}", self.record.id)),
            OperationKind::Delete => (Verb::Delete, format!("{base}/{}", self.record.id)),
        }
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, mutation: &Mutation) -> Result<(), RemoteError>;
}

/// Applies mutations directly to a [`RecordStore`].
///
/// Used when the central store is reachable through the store abstraction
/// rather than over HTTP, and by tests.
pub struct StoreExecutor<S> {
    store: S,
}

impl<S: RecordStore> StoreExecutor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: RecordStore> RemoteExecutor for StoreExecutor<S> {
    async fn execute(&self, mutation: &Mutation) -> Result<(), RemoteError> {
        match mutation.kind {
            OperationKind::Create | OperationKind::Update => {
                self.store.put(mutation.entity, &mutation.record).await?
            }
            // deleting an absent record is already the desired end state
            OperationKind::Delete => {
                self.store
                    .delete(mutation.entity, &mutation.record.id)
                    .await?;
            }
        }
        Ok(())
    }
}
