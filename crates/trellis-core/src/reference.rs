//! Reference projector: folds `reference_added` / `reference_removed` events
//! into the reference snapshot for one action.
//!
//! A reference is identified by its composite key
//! `sourceRecordId + "|" + targetFieldKey`, not by row id. Replaying the same
//! event sequence from empty state always yields the same snapshot, and
//! replaying any single event twice is a no-op on row count.

use crate::event::{EventBody, StoredEvent};
use crate::types::RefMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ReferenceRow
// ---------------------------------------------------------------------------

/// One row of the reference snapshot: "this action currently points at this
/// source record's field."
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceRow {
    pub id: Uuid,
    pub action_id: Uuid,
    pub source_record_id: String,
    pub target_field_key: String,
    pub mode: RefMode,
    pub snapshot_value: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ReferenceRow {
    pub fn key(&self) -> String {
        composite_key(&self.source_record_id, &self.target_field_key)
    }
}

/// Identity of a reference within one action.
pub fn composite_key(source_record_id: &str, target_field_key: &str) -> String {
    format!("{source_record_id}|{target_field_key}")
}

// ---------------------------------------------------------------------------
// Fold
// ---------------------------------------------------------------------------

/// Apply one event to the snapshot map, keyed by composite key.
///
/// `reference_added` upserts: an existing row keeps its id and `created_at`
/// and only `mode`/`snapshot_value` are overwritten, so a replayed event
/// never duplicates a row. `reference_removed` deletes the matching key and
/// is a no-op when the key is absent. All other event kinds are ignored.
pub fn apply_event(rows: &mut BTreeMap<String, ReferenceRow>, event: &StoredEvent) {
    match &event.body {
        EventBody::ReferenceAdded {
            source_record_id,
            target_field_key,
            mode,
            snapshot_value,
        } => {
            let key = composite_key(source_record_id, target_field_key);
            match rows.get_mut(&key) {
                Some(existing) => {
                    existing.mode = *mode;
                    existing.snapshot_value = snapshot_value.clone();
                }
                None => {
                    rows.insert(
                        key,
                        ReferenceRow {
                            id: Uuid::new_v4(),
                            action_id: event.action_id,
                            source_record_id: source_record_id.clone(),
                            target_field_key: target_field_key.clone(),
                            mode: *mode,
                            snapshot_value: snapshot_value.clone(),
                            created_at: event.created_at,
                        },
                    );
                }
            }
        }
        EventBody::ReferenceRemoved {
            source_record_id,
            target_field_key,
        } => {
            rows.remove(&composite_key(source_record_id, target_field_key));
        }
        _ => {}
    }
}

/// Fold an ordered event sequence into a snapshot from empty state.
pub fn fold<'a>(events: impl IntoIterator<Item = &'a StoredEvent>) -> BTreeMap<String, ReferenceRow> {
    let mut rows = BTreeMap::new();
    for event in events {
        apply_event(&mut rows, event);
    }
    rows
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
