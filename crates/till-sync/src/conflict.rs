//! Conflict detection and last-writer-wins resolution for record sync.
//!
//! Two copies of a record conflict when their modification timestamps differ
//! and at least one non-system field differs. System fields (timestamps,
//! version counters) are declared per entity type and never compared.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use till_core::config::MissingTimestampPolicy;
use till_core::{EntityType, Record};

// ── Resolution ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Keep the local version, overwrite remote.
    KeepLocal,
    /// Keep the remote version, overwrite local.
    KeepRemote,
}

/// Ephemeral description of one conflicting record, used for resolution and
/// logging. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ConflictRecord {
    pub entity: EntityType,
    pub local_version: Record,
    pub remote_version: Record,
    pub differing_fields: Vec<String>,
}

/// Trait for conflict resolution strategies.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, conflict: &ConflictRecord) -> Resolution;
}

/// The strictly later modification wins; ties and missing timestamps go to
/// the remote copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriterWins;

impl ConflictResolver for LastWriterWins {
    fn resolve(&self, conflict: &ConflictRecord) -> Resolution {
        match (
            conflict.local_version.modified_at,
            conflict.remote_version.modified_at,
        ) {
            (Some(local), Some(remote)) if local > remote => Resolution::KeepLocal,
            _ => Resolution::KeepRemote,
        }
    }
}

// ── Detection ─────────────────────────────────────────────────────────────────

/// Names of non-system fields whose values differ between `a` and `b`.
/// A field present on one side only counts as differing.
pub fn differing_fields(entity: EntityType, a: &Record, b: &Record) -> Vec<String> {
    let names: BTreeSet<&String> = a.fields.keys().chain(b.fields.keys()).collect();
    names
        .into_iter()
        .filter(|name| !entity.is_system_field(name))
        .filter(|name| a.fields.get(*name) != b.fields.get(*name))
        .cloned()
        .collect()
}

pub fn detect_conflict(
    entity: EntityType,
    a: &Record,
    b: &Record,
    policy: MissingTimestampPolicy,
) -> bool {
    match (a.modified_at, b.modified_at) {
        (Some(x), Some(y)) if x == y => false,
        (Some(_), Some(_)) => !differing_fields(entity, a, b).is_empty(),
        _ => match policy {
            MissingTimestampPolicy::Flag => !differing_fields(entity, a, b).is_empty(),
            MissingTimestampPolicy::Ignore => false,
        },
    }
}

pub fn conflict_record(entity: EntityType, local: &Record, remote: &Record) -> ConflictRecord {
    ConflictRecord {
        entity,
        local_version: local.clone(),
        remote_version: remote.clone(),
        differing_fields: differing_fields(entity, local, remote),
    }
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// A timestamp strictly later than both inputs and no earlier than `now`.
pub fn fresh_stamp(local: &Record, remote: &Record, now: DateTime<Utc>) -> DateTime<Utc> {
    let latest = local.modified_at.max(remote.modified_at);
    match latest {
        Some(ts) if ts >= now => ts + Duration::microseconds(1),
        _ => now,
    }
}

/// Pick the surviving copy with `resolver` and stamp it fresh.
pub fn resolve_with(
    resolver: &dyn ConflictResolver,
    conflict: &ConflictRecord,
    now: DateTime<Utc>,
) -> (Resolution, Record) {
    let resolution = resolver.resolve(conflict);
    let mut winner = match resolution {
        Resolution::KeepLocal => conflict.local_version.clone(),
        Resolution::KeepRemote => conflict.remote_version.clone(),
    };
    winner.modified_at = Some(fresh_stamp(
        &conflict.local_version,
        &conflict.remote_version,
        now,
    ));
    (resolution, winner)
}

/// Last-writer-wins resolution of `local` against `remote`.
pub fn resolve_conflict(entity: EntityType, local: &Record, remote: &Record) -> Record {
    let conflict = conflict_record(entity, local, remote);
    resolve_with(&LastWriterWins, &conflict, Utc::now()).1
}

// ── Per-record reconciliation ─────────────────────────────────────────────────

/// What a sync pass should do with one changed source record.
#[derive(Debug, Clone)]
pub enum RecordAction {
    /// Destination has no copy.
    Insert,
    /// Destination copy is stale; replace it.
    Overwrite,
    /// Destination already holds the same version.
    Unchanged,
    /// Both sides changed since the window start.
    Conflict,
}

/// Compare a changed source record against the destination copy.
///
/// A destination copy modified after `window_start` was edited concurrently
/// with the source; only then is [`detect_conflict`] consulted. A destination
/// without a timestamp counts as concurrently edited unless the policy is
/// [`MissingTimestampPolicy::Ignore`].
pub fn compare(
    entity: EntityType,
    source: &Record,
    destination: Option<&Record>,
    window_start: DateTime<Utc>,
    policy: MissingTimestampPolicy,
) -> RecordAction {
    let Some(dest) = destination else {
        return RecordAction::Insert;
    };

    if source.modified_at == dest.modified_at && differing_fields(entity, source, dest).is_empty()
    {
        return RecordAction::Unchanged;
    }

    let dest_changed = dest.modified_at.map_or(true, |ts| ts > window_start);
    if dest_changed && detect_conflict(entity, source, dest, policy) {
        RecordAction::Conflict
    } else {
        RecordAction::Overwrite
    }
}


#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    fn arb_record(id: &'static str) -> impl Strategy<Value = Record> {
        (0i64..1_000_000, 0i64..500, "[a-z]{1,6}").prop_map(move |(secs, price, name)| {
            Record::new(id, DateTime::<Utc>::from_timestamp(1_700_000_000 + secs, 0))
                .with_field("price", price)
                .with_field("name", name)
        })
    }

    proptest! {
        #[test]
        fn resolution_independent_of_roles(a in arb_record("r"), b in arb_record("r")) {
            prop_assume!(a.modified_at != b.modified_at);
            let now = Utc::now();
            let ab = resolve_with(&LastWriterWins, &conflict_record(EntityType::Sale, &a, &b), now).1;
            let ba = resolve_with(&LastWriterWins, &conflict_record(EntityType::Sale, &b, &a), now).1;
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn winner_is_stamped_after_both(a in arb_record("r"), b in arb_record("r")) {
            let winner = resolve_conflict(EntityType::Stock, &a, &b);
            let stamp = winner.modified_at.unwrap();
            prop_assert!(Some(stamp) > a.modified_at);
            prop_assert!(Some(stamp) > b.modified_at);
        }

        #[test]
        fn detection_is_symmetric(a in arb_record("r"), b in arb_record("r")) {
            for policy in [MissingTimestampPolicy::Flag, MissingTimestampPolicy::Ignore] {
                prop_assert_eq!(
                    detect_conflict(EntityType::Product, &a, &b, policy),
                    detect_conflict(EntityType::Product, &b, &a, policy)
                );
            }
        }
    }
}
