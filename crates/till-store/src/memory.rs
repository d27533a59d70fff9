//! In-memory record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use till_core::{EntityType, Record};

use crate::error::StoreResult;
use crate::store::{in_window, sort_by_modification, RecordStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<EntityType, BTreeMap<String, Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without going through the async trait.
    pub fn insert(&self, entity: EntityType, record: Record) {
        self.tables
            .lock()
            .unwrap()
            .entry(entity)
            .or_default()
            .insert(record.id.clone(), record);
    }

    pub fn len(&self, entity: EntityType) -> usize {
        self.tables
            .lock()
            .unwrap()
            .get(&entity)
            .map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().unwrap().values().all(BTreeMap::is_empty)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, entity: EntityType, id: &str) -> StoreResult<Option<Record>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(&entity)
            .and_then(|t| t.get(id))
            .cloned())
    }

    async fn put(&self, entity: EntityType, record: &Record) -> StoreResult<()> {
        self.insert(entity, record.clone());
        Ok(())
    }

    async fn delete(&self, entity: EntityType, id: &str) -> StoreResult<bool> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get_mut(&entity)
            .and_then(|t| t.remove(id))
            .is_some())
    }

    async fn modified_since(
        &self,
        entity: EntityType,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Record>> {
        let mut records: Vec<Record> = self
            .tables
            .lock()
            .unwrap()
            .get(&entity)
            .map(|t| t.values().filter(|r| in_window(r, since)).cloned().collect())
            .unwrap_or_default();
        sort_by_modification(&mut records);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn tables_are_isolated() {
        let store = MemoryStore::new();
        store.insert(EntityType::Product, Record::new("x", None));
        assert!(store.get(EntityType::Category, "x").await.unwrap().is_none());
        assert_eq!(store.len(EntityType::Product), 1);
    }

    #[tokio::test]
    async fn modified_since_filters_window() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.insert(
            EntityType::Stock,
            Record::new("old", Some(now - Duration::hours(2))),
        );
        store.insert(EntityType::Stock, Record::new("new", Some(now)));

        let changed = store
            .modified_since(EntityType::Stock, now - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].id, "new");
    }
}
