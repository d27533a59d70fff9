//! Per-table sync watermarks.
//!
//! One JSON row per entity type at `sync_metadata/<entity>.json` in the local
//! state operator. Rows are created lazily on first sync and removed only by
//! an explicit reset.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use opendal::{ErrorKind, Operator};
use serde::{Deserialize, Serialize};
use till_core::EntityType;
use tracing::info;

const METADATA_DIR: &str = "sync_metadata/";

/// Direction of a table pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// local → remote
    Push,
    /// remote → local
    Pull,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Direction::Push => "push",
            Direction::Pull => "pull",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncWatermark {
    pub entity_type: EntityType,
    /// Latest pass-start of either direction
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_push_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_pull_at: Option<DateTime<Utc>>,
    /// Number of completed passes
    pub sync_version: u64,
    /// Conflicts resolved on this table over its lifetime
    pub conflict_count: u64,
}

impl SyncWatermark {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            last_sync_at: None,
            last_push_at: None,
            last_pull_at: None,
            sync_version: 0,
            conflict_count: 0,
        }
    }

    /// Start of the delta window for `direction`; the epoch when never synced.
    pub fn window_start(&self, direction: Direction) -> DateTime<Utc> {
        let cursor = match direction {
            Direction::Push => self.last_push_at,
            Direction::Pull => self.last_pull_at,
        };
        cursor.unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Record a completed pass that started at `pass_start`.
    pub fn advance(&mut self, direction: Direction, pass_start: DateTime<Utc>, conflicts: u64) {
        match direction {
            Direction::Push => self.last_push_at = Some(pass_start),
            Direction::Pull => self.last_pull_at = Some(pass_start),
        }
        self.last_sync_at = self.last_sync_at.max(Some(pass_start));
        self.sync_version += 1;
        self.conflict_count += conflicts;
    }
}

#[derive(Clone)]
pub struct MetadataStore {
    op: Operator,
}

impl MetadataStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    fn key(entity: EntityType) -> String {
        format!("{METADATA_DIR}{entity}.json")
    }

    pub async fn get(&self, entity: EntityType) -> Result<Option<SyncWatermark>> {
        let key = Self::key(entity);
        match self.op.read(&key).await {
            Ok(buf) => {
                let row = serde_json::from_slice(&buf.to_vec())
                    .with_context(|| format!("parsing {key}"))?;
                Ok(Some(row))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::anyhow!("reading {key}: {e}")),
        }
    }

    pub async fn get_or_default(&self, entity: EntityType) -> Result<SyncWatermark> {
        Ok(self
            .get(entity)
            .await?
            .unwrap_or_else(|| SyncWatermark::new(entity)))
    }

    pub async fn put(&self, watermark: &SyncWatermark) -> Result<()> {
        let key = Self::key(watermark.entity_type);
        let bytes = serde_json::to_vec_pretty(watermark)?;
        self.op
            .write(&key, bytes)
            .await
            .map_err(|e| anyhow::anyhow!("writing {key}: {e}"))?;
        Ok(())
    }

    /// Delete one table's watermark; the next pass rescans from the epoch.
    pub async fn reset(&self, entity: EntityType) -> Result<()> {
        let key = Self::key(entity);
        self.op
            .delete(&key)
            .await
            .map_err(|e| anyhow::anyhow!("deleting {key}: {e}"))?;
        info!(entity = %entity, "watermark reset");
        Ok(())
    }

    pub async fn reset_all(&self) -> Result<()> {
        for entity in EntityType::ALL {
            self.reset(entity).await?;
        }
        Ok(())
    }

    /// Every stored watermark, in sync order.
    pub async fn all(&self) -> Result<Vec<SyncWatermark>> {
        let mut rows = Vec::new();
        for entity in EntityType::ALL {
            if let Some(row) = self.get(entity).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}
