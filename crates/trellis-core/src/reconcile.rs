//! Reconciliation: compute the minimal add/remove delta between the current
//! reference snapshot and a caller-submitted desired set.
//!
//! Entries present in both sets under the same composite key are untouched —
//! the bulk endpoint never re-emits events for unchanged references, so the
//! event log stays minimal.

use crate::reference::{composite_key, ReferenceRow};
use crate::types::RefMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// ReferenceSpec
// ---------------------------------------------------------------------------

/// A caller-supplied reference entry. `mode` is implied: a present
/// `snapshot_value` makes the reference static, absence makes it dynamic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSpec {
    pub source_record_id: String,
    pub target_field_key: String,
    #[serde(default)]
    pub snapshot_value: Option<serde_json::Value>,
}

impl ReferenceSpec {
    pub fn key(&self) -> String {
        composite_key(&self.source_record_id, &self.target_field_key)
    }

    pub fn mode(&self) -> RefMode {
        if self.snapshot_value.is_some() {
            RefMode::Static
        } else {
            RefMode::Dynamic
        }
    }
}

// ---------------------------------------------------------------------------
// ReconcilePlan
// ---------------------------------------------------------------------------

/// The event delta converging the snapshot to the desired set. Removals are
/// emitted before additions so a key that is removed and re-added in one call
/// deterministically ends up present.
#[derive(Debug, Clone)]
pub struct ReconcilePlan {
    pub to_remove: Vec<ReferenceRow>,
    pub to_add: Vec<ReferenceSpec>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

/// Diff the current snapshot against the desired set by composite key.
///
/// Duplicate keys in `desired` collapse to the last entry, mirroring the
/// upsert semantics a client would observe submitting them one at a time.
pub fn diff(current: &BTreeMap<String, ReferenceRow>, desired: &[ReferenceSpec]) -> ReconcilePlan {
    let mut desired_by_key: BTreeMap<String, &ReferenceSpec> = BTreeMap::new();
    for spec in desired {
        desired_by_key.insert(spec.key(), spec);
    }

    let to_remove = current
        .iter()
        .filter(|(key, _)| !desired_by_key.contains_key(*key))
        .map(|(_, row)| row.clone())
        .collect();

    let to_add = desired_by_key
        .into_iter()
        .filter(|(key, _)| !current.contains_key(key))
        .map(|(_, spec)| spec.clone())
        .collect();

    ReconcilePlan { to_remove, to_add }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
