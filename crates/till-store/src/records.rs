//! OpenDAL-backed record store.
//!
//! Layout: one JSON document per record at `{prefix}/{entity}/{id}.json`.
//! Works over any OpenDAL service; the daemon uses the local filesystem.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opendal::{ErrorKind, Operator};
use till_core::{EntityType, Record};
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::health::{check_health, HealthCheck};
use crate::store::{in_window, sort_by_modification, RecordStore};

#[derive(Clone)]
pub struct OpendalStore {
    op: Operator,
    prefix: String,
}

impl OpendalStore {
    pub fn new(op: Operator, prefix: impl Into<String>) -> Self {
        Self {
            op,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn table_dir(&self, entity: EntityType) -> String {
        format!("{}/{}/", self.prefix, entity)
    }

    fn key(&self, entity: EntityType, id: &str) -> StoreResult<String> {
        if id.is_empty() || id.contains('/') || id.contains("..") {
            return Err(StoreError::record(id, "record id is not a valid key"));
        }
        Ok(format!("{}{id}.json", self.table_dir(entity)))
    }

    async fn read_record(&self, key: &str, id: &str) -> StoreResult<Option<Record>> {
        match self.op.read(key).await {
            Ok(buf) => serde_json::from_slice(&buf.to_vec())
                .map(Some)
                .map_err(|e| StoreError::record(id, format!("decoding {key}: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Unavailable(format!("reading {key}: {e}"))),
        }
    }
}

#[async_trait]
impl RecordStore for OpendalStore {
    async fn get(&self, entity: EntityType, id: &str) -> StoreResult<Option<Record>> {
        let key = self.key(entity, id)?;
        self.read_record(&key, id).await
    }

    async fn put(&self, entity: EntityType, record: &Record) -> StoreResult<()> {
        let key = self.key(entity, &record.id)?;
        let bytes = serde_json::to_vec(record)
            .map_err(|e| StoreError::record(&record.id, format!("encoding: {e}")))?;
        self.op
            .write(&key, bytes)
            .await
            .map_err(|e| StoreError::Unavailable(format!("writing {key}: {e}")))?;
        Ok(())
    }

    async fn delete(&self, entity: EntityType, id: &str) -> StoreResult<bool> {
        let key = self.key(entity, id)?;
        match self.op.stat(&key).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StoreError::Unavailable(format!("stat {key}: {e}"))),
        }
        self.op
            .delete(&key)
            .await
            .map_err(|e| StoreError::Unavailable(format!("deleting {key}: {e}")))?;
        Ok(true)
    }

    async fn modified_since(
        &self,
        entity: EntityType,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Record>> {
        let dir = self.table_dir(entity);
        let entries = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Unavailable(format!("listing {dir}: {e}"))),
        };

        let mut records = Vec::new();
        for entry in entries {
            let Some(id) = entry.name().strip_suffix(".json") else {
                continue;
            };
            match self.read_record(entry.path(), id).await {
                Ok(Some(record)) if in_window(&record, since) => records.push(record),
                Ok(_) => {}
                Err(e) if !e.is_fatal() => {
                    warn!(entity = %entity, id, "skipping unreadable record: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        sort_by_modification(&mut records);
        Ok(records)
    }
}

#[async_trait]
impl HealthCheck for OpendalStore {
    async fn check(&self) -> anyhow::Result<()> {
        check_health(&self.op).await
    }
}
