//! The key-addressable record store both sides of a sync are built on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use till_core::{EntityType, Record};

use crate::error::StoreResult;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, entity: EntityType, id: &str) -> StoreResult<Option<Record>>;

    /// Insert or replace a record.
    async fn put(&self, entity: EntityType, record: &Record) -> StoreResult<()>;

    /// Remove a record. Returns false when it was already absent.
    async fn delete(&self, entity: EntityType, id: &str) -> StoreResult<bool>;

    /// Records modified strictly after `since`, oldest first.
    async fn modified_since(
        &self,
        entity: EntityType,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Record>>;
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    async fn get(&self, entity: EntityType, id: &str) -> StoreResult<Option<Record>> {
        (**self).get(entity, id).await
    }

    async fn put(&self, entity: EntityType, record: &Record) -> StoreResult<()> {
        (**self).put(entity, record).await
    }

    async fn delete(&self, entity: EntityType, id: &str) -> StoreResult<bool> {
        (**self).delete(entity, id).await
    }

    async fn modified_since(
        &self,
        entity: EntityType,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Record>> {
        (**self).modified_since(entity, since).await
    }
}

/// Delta window membership shared by the store implementations.
///
/// A record without a timestamp is only visible to a scan that starts at the
/// epoch, so untimestamped rows are picked up once after a watermark reset.
pub fn in_window(record: &Record, since: DateTime<Utc>) -> bool {
    match record.modified_at {
        Some(ts) => ts > since,
        None => since <= DateTime::<Utc>::UNIX_EPOCH,
    }
}

/// Order delta results oldest first, records without a timestamp leading.
pub fn sort_by_modification(records: &mut [Record]) {
    records.sort_by(|a, b| {
        a.modified_at
            .cmp(&b.modified_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn window_is_strictly_after() {
        let t = Utc::now();
        let record = Record::new("a", Some(t));
        assert!(!in_window(&record, t));
        assert!(in_window(&record, t - Duration::milliseconds(1)));
    }

    #[test]
    fn untimestamped_only_from_epoch() {
        let record = Record::new("a", None);
        assert!(in_window(&record, DateTime::<Utc>::UNIX_EPOCH));
        assert!(!in_window(&record, Utc::now()));
    }

    #[test]
    fn sort_is_oldest_first() {
        let t = Utc::now();
        let mut records = vec![
            Record::new("b", Some(t)),
            Record::new("a", Some(t - Duration::seconds(5))),
            Record::new("c", None),
        ];
        sort_by_modification(&mut records);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }
}
