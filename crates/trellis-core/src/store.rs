//! Persistent store for actions, events, and projected snapshots using redb.
//!
//! # Table design
//!
//! `EVENTS` uses a 24-byte composite key:
//! ```text
//! [ action uuid: 16 bytes | seq: u64 big-endian (8 bytes) ]
//! ```
//!
//! Because the action id occupies the high bytes, a prefix range scan returns
//! one action's events in `seq` order — the fold order every projector
//! depends on. `REFERENCES` keys are `action uuid ++ composite reference key`
//! so one action's snapshot is likewise a single range scan.
//!
//! # Atomicity
//!
//! Every command runs inside one redb write transaction: the event append and
//! the projector updates it triggers commit together or not at all, so a
//! reader never observes an event without its projection (or the reverse).
//! redb's single-writer model also serializes the read-diff-emit sequence of
//! [`Store::replace_references`], closing the lost-update window between
//! snapshot read and event emission.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableTable, Table, TableDefinition, WriteTransaction};
use uuid::Uuid;

use crate::action::Action;
use crate::error::{Result, TrellisError};
use crate::event::{EventBody, StoredEvent};
use crate::reconcile::{self, ReferenceSpec};
use crate::reference::{self, ReferenceRow};
use crate::status::{self, WorkflowNode};
use crate::types::{ContextType, FieldBinding, WorkStatus};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// Key: action uuid (16 bytes). Value: JSON-encoded Action.
const ACTIONS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("actions");

/// Key: 24-byte composite (action uuid ++ seq big-endian). Value: JSON-encoded StoredEvent.
const EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("events");

/// Key: action uuid ++ composite reference key (UTF-8). Value: JSON-encoded ReferenceRow.
const REFERENCES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("references");

/// Key: action uuid (16 bytes). Value: JSON-encoded WorkflowNode.
const WORKFLOW: TableDefinition<&[u8], &[u8]> = TableDefinition::new("workflow");

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn event_key(action_id: Uuid, seq: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(action_id.as_bytes());
    key[16..].copy_from_slice(&seq.to_be_bytes());
    key
}

/// Inclusive bounds covering every event of one action.
fn event_bounds(action_id: Uuid) -> ([u8; 24], [u8; 24]) {
    (event_key(action_id, 0), event_key(action_id, u64::MAX))
}

fn reference_key(action_id: Uuid, composite: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + composite.len());
    key.extend_from_slice(action_id.as_bytes());
    key.extend_from_slice(composite.as_bytes());
    key
}

/// Inclusive bounds covering every reference row of one action. The upper
/// bound appends 0xff, which sorts after any UTF-8 composite key.
fn reference_bounds(action_id: Uuid) -> (Vec<u8>, Vec<u8>) {
    let lower = action_id.as_bytes().to_vec();
    let mut upper = action_id.as_bytes().to_vec();
    upper.push(0xff);
    (lower, upper)
}

fn db_err(e: impl std::fmt::Display) -> TrellisError {
    TrellisError::Storage(e.to_string())
}

// ---------------------------------------------------------------------------
// Generic table reads (shared between read and write transactions)
// ---------------------------------------------------------------------------

fn read_action(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    id: Uuid,
) -> Result<Option<Action>> {
    match table.get(id.as_bytes().as_slice()).map_err(db_err)? {
        Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
        None => Ok(None),
    }
}

fn read_events(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    action_id: Uuid,
) -> Result<Vec<StoredEvent>> {
    let (lower, upper) = event_bounds(action_id);
    let mut events = Vec::new();
    for entry in table
        .range(lower.as_slice()..=upper.as_slice())
        .map_err(db_err)?
    {
        let (_, v) = entry.map_err(db_err)?;
        events.push(serde_json::from_slice(v.value())?);
    }
    Ok(events)
}

fn read_references(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    action_id: Uuid,
) -> Result<Vec<ReferenceRow>> {
    let (lower, upper) = reference_bounds(action_id);
    let mut rows = Vec::new();
    for entry in table
        .range(lower.as_slice()..=upper.as_slice())
        .map_err(db_err)?
    {
        let (_, v) = entry.map_err(db_err)?;
        rows.push(serde_json::from_slice(v.value())?);
    }
    Ok(rows)
}

/// Next seq for an action: one past the highest existing key in its range.
fn next_seq(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    action_id: Uuid,
) -> Result<u64> {
    let (lower, upper) = event_bounds(action_id);
    let last = table
        .range(lower.as_slice()..=upper.as_slice())
        .map_err(db_err)?
        .next_back();
    match last {
        Some(entry) => {
            let (_, v) = entry.map_err(db_err)?;
            let event: StoredEvent = serde_json::from_slice(v.value())?;
            Ok(event.seq + 1)
        }
        None => Ok(0),
    }
}

// ---------------------------------------------------------------------------
// Tables — all four tables of one write transaction
// ---------------------------------------------------------------------------

/// The open tables of a single write transaction. Appends, projections, and
/// snapshot reads all go through here so a command touches storage exactly
/// once and commits as a unit.
struct Tables<'txn> {
    actions: Table<'txn, &'static [u8], &'static [u8]>,
    events: Table<'txn, &'static [u8], &'static [u8]>,
    references: Table<'txn, &'static [u8], &'static [u8]>,
    workflow: Table<'txn, &'static [u8], &'static [u8]>,
}

impl<'txn> Tables<'txn> {
    fn open(wt: &'txn WriteTransaction) -> Result<Self> {
        Ok(Self {
            actions: wt.open_table(ACTIONS).map_err(db_err)?,
            events: wt.open_table(EVENTS).map_err(db_err)?,
            references: wt.open_table(REFERENCES).map_err(db_err)?,
            workflow: wt.open_table(WORKFLOW).map_err(db_err)?,
        })
    }

    fn put_action(&mut self, action: &Action) -> Result<()> {
        let value = serde_json::to_vec(action)?;
        self.actions
            .insert(action.id.as_bytes().as_slice(), value.as_slice())
            .map_err(db_err)?;
        Ok(())
    }

    /// Load an action and require it to be live. A missing action is
    /// `ActionNotFound`; a retracted one is `ActionRetracted` — the log never
    /// accepts events for either.
    fn live_action(&self, id: Uuid) -> Result<Action> {
        let action = read_action(&self.actions, id)?.ok_or(TrellisError::ActionNotFound(id))?;
        if action.is_retracted() {
            return Err(TrellisError::ActionRetracted(id));
        }
        Ok(action)
    }

    /// Append one event and synchronously run the projectors it concerns.
    fn append(&mut self, action: &Action, body: EventBody) -> Result<StoredEvent> {
        let seq = next_seq(&self.events, action.id)?;
        let event = StoredEvent {
            id: Uuid::new_v4(),
            action_id: action.id,
            context_id: action.context_id.clone(),
            context_type: action.context_type,
            seq,
            body,
            created_at: Utc::now(),
        };
        let value = serde_json::to_vec(&event)?;
        self.events
            .insert(event_key(action.id, seq).as_slice(), value.as_slice())
            .map_err(db_err)?;
        self.project(&event)?;
        Ok(event)
    }

    /// Projector dispatch. Reference events update the snapshot row for their
    /// composite key in place; work-lifecycle and declaration events refold
    /// the workflow node from the action's full event sequence.
    fn project(&mut self, event: &StoredEvent) -> Result<()> {
        match &event.body {
            EventBody::ReferenceAdded {
                source_record_id,
                target_field_key,
                ..
            }
            | EventBody::ReferenceRemoved {
                source_record_id,
                target_field_key,
            } => {
                let composite = reference::composite_key(source_record_id, target_field_key);
                let key = reference_key(event.action_id, &composite);
                let existing = match self.references.get(key.as_slice()).map_err(db_err)? {
                    Some(guard) => Some(serde_json::from_slice(guard.value())?),
                    None => None,
                };
                let mut rows: BTreeMap<String, ReferenceRow> =
                    existing.into_iter().map(|r: ReferenceRow| (r.key(), r)).collect();
                reference::apply_event(&mut rows, event);
                match rows.remove(&composite) {
                    Some(row) => {
                        let value = serde_json::to_vec(&row)?;
                        self.references
                            .insert(key.as_slice(), value.as_slice())
                            .map_err(db_err)?;
                    }
                    None => {
                        self.references.remove(key.as_slice()).map_err(db_err)?;
                    }
                }
            }
            EventBody::ActionDeclared { .. }
            | EventBody::WorkStarted
            | EventBody::WorkStopped
            | EventBody::WorkFinished
            | EventBody::WorkBlocked { .. }
            | EventBody::WorkUnblocked => {
                let events = read_events(&self.events, event.action_id)?;
                let node = status::fold(&events).into_node(event.action_id);
                let value = serde_json::to_vec(&node)?;
                self.workflow
                    .insert(event.action_id.as_bytes().as_slice(), value.as_slice())
                    .map_err(db_err)?;
            }
        }
        Ok(())
    }

    fn current_status(&self, action_id: Uuid) -> Result<WorkStatus> {
        Ok(status::fold(&read_events(&self.events, action_id)?).status())
    }
}

// ---------------------------------------------------------------------------
// ReconcileOutcome / RebuildReport
// ---------------------------------------------------------------------------

/// Result of a bulk replace: the converged snapshot plus event counts.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub references: Vec<ReferenceRow>,
    pub added: usize,
    pub removed: usize,
}

/// Result of a snapshot rebuild from the event log.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub actions: usize,
    pub events: usize,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Persistent store: action records, the append-only event log, and the
/// snapshot tables owned by the projectors.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open or create the database at `path`, ensuring all tables exist.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(ACTIONS).map_err(db_err)?;
        wt.open_table(EVENTS).map_err(db_err)?;
        wt.open_table(REFERENCES).map_err(db_err)?;
        wt.open_table(WORKFLOW).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Action store
    // -----------------------------------------------------------------------

    /// Create a new action. Emits no events; callers record declared fields
    /// via [`Store::append`] with an `action_declared` body if needed.
    pub fn compose(
        &self,
        context_id: impl Into<String>,
        context_type: ContextType,
        kind: impl Into<String>,
        field_bindings: Vec<FieldBinding>,
    ) -> Result<Action> {
        let action = Action::new(context_id, context_type, kind, field_bindings);
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut tables = Tables::open(&wt)?;
            tables.put_action(&action)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(action)
    }

    pub fn get_action(&self, id: Uuid) -> Result<Action> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ACTIONS).map_err(db_err)?;
        read_action(&table, id)?.ok_or(TrellisError::ActionNotFound(id))
    }

    /// Replace the action's bindings, recording the change in its amendment
    /// trail. Fails with `ActionRetracted` on a retracted action.
    pub fn amend_action(
        &self,
        id: Uuid,
        field_bindings: Vec<FieldBinding>,
        reason: impl Into<String>,
    ) -> Result<Action> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let action = {
            let mut tables = Tables::open(&wt)?;
            let mut action = tables.live_action(id)?;
            action.amend(field_bindings, reason);
            tables.put_action(&action)?;
            action
        };
        wt.commit().map_err(db_err)?;
        Ok(action)
    }

    /// Set `retracted_at`. Irreversible; fails with `AlreadyRetracted` when
    /// called twice.
    pub fn retract_action(&self, id: Uuid) -> Result<()> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut tables = Tables::open(&wt)?;
            let mut action =
                read_action(&tables.actions, id)?.ok_or(TrellisError::ActionNotFound(id))?;
            if action.is_retracted() {
                return Err(TrellisError::AlreadyRetracted(id));
            }
            action.retracted_at = Some(Utc::now());
            tables.put_action(&action)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event log
    // -----------------------------------------------------------------------

    /// Append one event for a live action and run its projectors, all in one
    /// transaction. The stored event carries an assigned id, the action's
    /// context stamp, and a seq monotonic within the action.
    pub fn append(&self, action_id: Uuid, body: EventBody) -> Result<StoredEvent> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let event = {
            let mut tables = Tables::open(&wt)?;
            let action = tables.live_action(action_id)?;
            tables.append(&action, body)?
        };
        wt.commit().map_err(db_err)?;
        Ok(event)
    }

    /// All events of an action in fold order. Historical events of a
    /// retracted action remain queryable.
    pub fn events_for_action(&self, action_id: Uuid) -> Result<Vec<StoredEvent>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let actions = rt.open_table(ACTIONS).map_err(db_err)?;
        read_action(&actions, action_id)?.ok_or(TrellisError::ActionNotFound(action_id))?;
        let events = rt.open_table(EVENTS).map_err(db_err)?;
        read_events(&events, action_id)
    }

    // -----------------------------------------------------------------------
    // Reference snapshot
    // -----------------------------------------------------------------------

    /// Current reference snapshot for an action, from the projector-owned
    /// table — never from replaying the log on the read path.
    pub fn get_references(&self, action_id: Uuid) -> Result<Vec<ReferenceRow>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let actions = rt.open_table(ACTIONS).map_err(db_err)?;
        read_action(&actions, action_id)?.ok_or(TrellisError::ActionNotFound(action_id))?;
        let references = rt.open_table(REFERENCES).map_err(db_err)?;
        read_references(&references, action_id)
    }

    /// Emit a `reference_added` event for the given entry.
    pub fn add_reference(&self, action_id: Uuid, spec: &ReferenceSpec) -> Result<StoredEvent> {
        self.append(
            action_id,
            EventBody::ReferenceAdded {
                source_record_id: spec.source_record_id.clone(),
                target_field_key: spec.target_field_key.clone(),
                mode: spec.mode(),
                snapshot_value: spec.snapshot_value.clone(),
            },
        )
    }

    /// Emit a `reference_removed` event. Removing a key that is not in the
    /// snapshot still appends the event; the projector treats it as a no-op.
    pub fn remove_reference(
        &self,
        action_id: Uuid,
        source_record_id: impl Into<String>,
        target_field_key: impl Into<String>,
    ) -> Result<StoredEvent> {
        self.append(
            action_id,
            EventBody::ReferenceRemoved {
                source_record_id: source_record_id.into(),
                target_field_key: target_field_key.into(),
            },
        )
    }

    /// Bulk replace: converge the snapshot to `desired` with the minimal
    /// event delta — removals first, then additions. Runs read, diff, emit,
    /// and re-read inside one write transaction, so no concurrent writer can
    /// interleave between the snapshot read and the emitted events.
    pub fn replace_references(
        &self,
        action_id: Uuid,
        desired: &[ReferenceSpec],
    ) -> Result<ReconcileOutcome> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let outcome = {
            let mut tables = Tables::open(&wt)?;
            let action = tables.live_action(action_id)?;

            let current: BTreeMap<String, ReferenceRow> =
                read_references(&tables.references, action_id)?
                    .into_iter()
                    .map(|r| (r.key(), r))
                    .collect();
            let plan = reconcile::diff(&current, desired);
            let (added, removed) = (plan.to_add.len(), plan.to_remove.len());

            for row in &plan.to_remove {
                tables.append(
                    &action,
                    EventBody::ReferenceRemoved {
                        source_record_id: row.source_record_id.clone(),
                        target_field_key: row.target_field_key.clone(),
                    },
                )?;
            }
            for spec in &plan.to_add {
                tables.append(
                    &action,
                    EventBody::ReferenceAdded {
                        source_record_id: spec.source_record_id.clone(),
                        target_field_key: spec.target_field_key.clone(),
                        mode: spec.mode(),
                        snapshot_value: spec.snapshot_value.clone(),
                    },
                )?;
            }

            ReconcileOutcome {
                references: read_references(&tables.references, action_id)?,
                added,
                removed,
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Work lifecycle
    // -----------------------------------------------------------------------

    /// Move to `active`. When the action is blocked this emits
    /// `work_unblocked` immediately before `work_started`, keeping the stream
    /// semantically truthful instead of implying a silent unblock.
    pub fn start_work(&self, action_id: Uuid) -> Result<Vec<StoredEvent>> {
        self.work_command(action_id, |current| match current {
            WorkStatus::Pending => Ok(vec![EventBody::WorkStarted]),
            WorkStatus::Blocked => Ok(vec![EventBody::WorkUnblocked, EventBody::WorkStarted]),
            WorkStatus::Active => Err(TrellisError::InvalidTransition {
                status: "active",
                event: "work_started",
            }),
            WorkStatus::Finished => Err(TrellisError::WorkFinished(action_id)),
        })
    }

    /// Move back to `pending`. Only valid from `active`.
    pub fn stop_work(&self, action_id: Uuid) -> Result<Vec<StoredEvent>> {
        self.work_command(action_id, |current| match current {
            WorkStatus::Active => Ok(vec![EventBody::WorkStopped]),
            WorkStatus::Finished => Err(TrellisError::WorkFinished(action_id)),
            other => Err(TrellisError::InvalidTransition {
                status: other.as_str(),
                event: "work_stopped",
            }),
        })
    }

    /// Move to the terminal `finished` state.
    pub fn finish_work(&self, action_id: Uuid) -> Result<Vec<StoredEvent>> {
        self.work_command(action_id, |current| match current {
            WorkStatus::Finished => Err(TrellisError::WorkFinished(action_id)),
            _ => Ok(vec![EventBody::WorkFinished]),
        })
    }

    pub fn block_work(&self, action_id: Uuid, reason: Option<String>) -> Result<Vec<StoredEvent>> {
        self.work_command(action_id, move |current| match current {
            WorkStatus::Blocked => Err(TrellisError::InvalidTransition {
                status: "blocked",
                event: "work_blocked",
            }),
            WorkStatus::Finished => Err(TrellisError::WorkFinished(action_id)),
            _ => Ok(vec![EventBody::WorkBlocked { reason }]),
        })
    }

    pub fn unblock_work(&self, action_id: Uuid) -> Result<Vec<StoredEvent>> {
        self.work_command(action_id, |current| match current {
            WorkStatus::Blocked => Ok(vec![EventBody::WorkUnblocked]),
            WorkStatus::Finished => Err(TrellisError::WorkFinished(action_id)),
            other => Err(TrellisError::InvalidTransition {
                status: other.as_str(),
                event: "work_unblocked",
            }),
        })
    }

    /// Derived status node for an action. An action with no work events reads
    /// as `pending` with no recorded fields.
    pub fn get_workflow(&self, action_id: Uuid) -> Result<WorkflowNode> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let actions = rt.open_table(ACTIONS).map_err(db_err)?;
        read_action(&actions, action_id)?.ok_or(TrellisError::ActionNotFound(action_id))?;
        let workflow = rt.open_table(WORKFLOW).map_err(db_err)?;
        match workflow
            .get(action_id.as_bytes().as_slice())
            .map_err(db_err)?
        {
            Some(guard) => Ok(serde_json::from_slice(guard.value())?),
            None => Ok(status::StatusFold::new().into_node(action_id)),
        }
    }

    /// Shared guard-then-emit flow for work transitions. The guard sees the
    /// status folded inside the same transaction that appends, so two racing
    /// commands cannot both pass a precondition that only one may take.
    fn work_command(
        &self,
        action_id: Uuid,
        guard: impl FnOnce(WorkStatus) -> Result<Vec<EventBody>>,
    ) -> Result<Vec<StoredEvent>> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let events = {
            let mut tables = Tables::open(&wt)?;
            let action = tables.live_action(action_id)?;
            let bodies = guard(tables.current_status(action_id)?)?;
            let mut events = Vec::with_capacity(bodies.len());
            for body in bodies {
                events.push(tables.append(&action, body)?);
            }
            events
        };
        wt.commit().map_err(db_err)?;
        Ok(events)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Drop both snapshot tables and refold them from the event log. Safe to
    /// run repeatedly; used for recovery when a projection is suspected stale.
    pub fn rebuild_snapshots(&self) -> Result<RebuildReport> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let report = {
            wt.delete_table(REFERENCES).map_err(db_err)?;
            wt.delete_table(WORKFLOW).map_err(db_err)?;
            let events_table = wt.open_table(EVENTS).map_err(db_err)?;
            let mut references = wt.open_table(REFERENCES).map_err(db_err)?;
            let mut workflow = wt.open_table(WORKFLOW).map_err(db_err)?;

            // Events iterate grouped by action because the action id is the
            // key prefix; fold each group as it completes.
            let mut report = RebuildReport {
                actions: 0,
                events: 0,
            };
            let mut group: Vec<StoredEvent> = Vec::new();
            for entry in events_table.iter().map_err(db_err)? {
                let (_, v) = entry.map_err(db_err)?;
                let event: StoredEvent = serde_json::from_slice(v.value())?;
                if let Some(last) = group.last() {
                    if last.action_id != event.action_id {
                        write_snapshots(&mut references, &mut workflow, &group)?;
                        report.actions += 1;
                        group.clear();
                    }
                }
                report.events += 1;
                group.push(event);
            }
            if !group.is_empty() {
                write_snapshots(&mut references, &mut workflow, &group)?;
                report.actions += 1;
            }
            report
        };
        wt.commit().map_err(db_err)?;
        Ok(report)
    }
}

/// Refold one action's events and write both snapshots.
fn write_snapshots(
    references: &mut Table<'_, &'static [u8], &'static [u8]>,
    workflow: &mut Table<'_, &'static [u8], &'static [u8]>,
    events: &[StoredEvent],
) -> Result<()> {
    let action_id = events[0].action_id;

    for row in reference::fold(events).values() {
        let key = reference_key(action_id, &row.key());
        let value = serde_json::to_vec(row)?;
        references
            .insert(key.as_slice(), value.as_slice())
            .map_err(db_err)?;
    }

    let node = status::fold(events).into_node(action_id);
    let value = serde_json::to_vec(&node)?;
    workflow
        .insert(action_id.as_bytes().as_slice(), value.as_slice())
        .map_err(db_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    fn compose(store: &Store) -> Action {
        store
            .compose("C1", ContextType::Subprocess, "assign-owner", vec![])
            .unwrap()
    }

    fn spec(rec: &str, field: &str, value: Option<&str>) -> ReferenceSpec {
        ReferenceSpec {
            source_record_id: rec.into(),
            target_field_key: field.into(),
            snapshot_value: value.map(|v| serde_json::json!(v)),
        }
    }

    // -------- action store --------

    #[test]
    fn compose_and_get_roundtrip() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        let loaded = store.get_action(action.id).unwrap();
        assert_eq!(loaded.id, action.id);
        assert_eq!(loaded.context_id, "C1");
        assert_eq!(loaded.kind, "assign-owner");
    }

    #[test]
    fn get_unknown_action_is_not_found() {
        let (_dir, store) = open_tmp();
        assert!(matches!(
            store.get_action(Uuid::new_v4()),
            Err(TrellisError::ActionNotFound(_))
        ));
    }

    #[test]
    fn amend_records_audit_trail() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        let amended = store
            .amend_action(
                action.id,
                vec![FieldBinding::new("owner", serde_json::json!("bob"))],
                "reassigned",
            )
            .unwrap();
        assert_eq!(amended.amendments.len(), 1);
        assert_eq!(amended.field_bindings[0].field_key, "owner");
    }

    #[test]
    fn amend_retracted_action_conflicts() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store.retract_action(action.id).unwrap();
        assert!(matches!(
            store.amend_action(action.id, vec![], "too late"),
            Err(TrellisError::ActionRetracted(_))
        ));
    }

    #[test]
    fn retract_twice_conflicts() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store.retract_action(action.id).unwrap();
        assert!(matches!(
            store.retract_action(action.id),
            Err(TrellisError::AlreadyRetracted(_))
        ));
    }

    // -------- event log --------

    #[test]
    fn append_assigns_monotonic_seq_and_context_stamp() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        let first = store.append(action.id, EventBody::WorkStarted).unwrap();
        let second = store.append(action.id, EventBody::WorkStopped).unwrap();
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_eq!(first.context_id, "C1");
        assert_eq!(first.context_type, ContextType::Subprocess);
    }

    #[test]
    fn append_to_missing_action_is_not_found() {
        let (_dir, store) = open_tmp();
        assert!(matches!(
            store.append(Uuid::new_v4(), EventBody::WorkStarted),
            Err(TrellisError::ActionNotFound(_))
        ));
    }

    #[test]
    fn append_to_retracted_action_is_rejected() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store.retract_action(action.id).unwrap();
        assert!(matches!(
            store.append(action.id, EventBody::WorkStarted),
            Err(TrellisError::ActionRetracted(_))
        ));
    }

    #[test]
    fn events_of_retracted_action_stay_queryable() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store.append(action.id, EventBody::WorkStarted).unwrap();
        store.retract_action(action.id).unwrap();
        assert_eq!(store.events_for_action(action.id).unwrap().len(), 1);
    }

    #[test]
    fn events_do_not_leak_across_actions() {
        let (_dir, store) = open_tmp();
        let a = compose(&store);
        let b = compose(&store);
        store.append(a.id, EventBody::WorkStarted).unwrap();
        store.append(b.id, EventBody::WorkStarted).unwrap();
        store.append(b.id, EventBody::WorkStopped).unwrap();

        assert_eq!(store.events_for_action(a.id).unwrap().len(), 1);
        assert_eq!(store.events_for_action(b.id).unwrap().len(), 2);
    }

    // -------- references --------

    #[test]
    fn add_reference_projects_into_snapshot() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .add_reference(action.id, &spec("R1", "owner", Some("alice")))
            .unwrap();

        let refs = store.get_references(action.id).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].source_record_id, "R1");
        assert_eq!(refs[0].mode, crate::types::RefMode::Static);
        assert_eq!(refs[0].snapshot_value, Some(serde_json::json!("alice")));
    }

    #[test]
    fn re_adding_same_key_does_not_duplicate() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .add_reference(action.id, &spec("R1", "owner", Some("alice")))
            .unwrap();
        store
            .add_reference(action.id, &spec("R1", "owner", Some("bob")))
            .unwrap();

        let refs = store.get_references(action.id).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].snapshot_value, Some(serde_json::json!("bob")));
    }

    #[test]
    fn remove_absent_reference_is_noop_but_appends_event() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store.remove_reference(action.id, "R9", "owner").unwrap();
        assert!(store.get_references(action.id).unwrap().is_empty());
        assert_eq!(store.events_for_action(action.id).unwrap().len(), 1);
    }

    #[test]
    fn reference_snapshots_are_scoped_per_action() {
        let (_dir, store) = open_tmp();
        let a = compose(&store);
        let b = compose(&store);
        store
            .add_reference(a.id, &spec("R1", "owner", None))
            .unwrap();
        store
            .add_reference(b.id, &spec("R2", "owner", None))
            .unwrap();

        let refs_a = store.get_references(a.id).unwrap();
        assert_eq!(refs_a.len(), 1);
        assert_eq!(refs_a[0].source_record_id, "R1");
    }

    // -------- bulk replace --------

    #[test]
    fn replace_converges_to_desired_set() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .add_reference(action.id, &spec("R1", "owner", None))
            .unwrap();
        store
            .add_reference(action.id, &spec("R2", "owner", None))
            .unwrap();

        let outcome = store
            .replace_references(
                action.id,
                &[spec("R2", "owner", None), spec("R3", "owner", None)],
            )
            .unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.removed, 1);

        let mut keys: Vec<String> = outcome.references.iter().map(|r| r.key()).collect();
        keys.sort();
        assert_eq!(keys, vec!["R2|owner", "R3|owner"]);
    }

    #[test]
    fn replace_emits_removals_before_additions() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .add_reference(action.id, &spec("R1", "owner", None))
            .unwrap();
        store
            .replace_references(action.id, &[spec("R2", "owner", None)])
            .unwrap();

        let events = store.events_for_action(action.id).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.body.kind()).collect();
        assert_eq!(
            kinds,
            vec!["reference_added", "reference_removed", "reference_added"]
        );
    }

    #[test]
    fn replace_leaves_unchanged_entries_untouched() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .add_reference(action.id, &spec("R1", "owner", Some("alice")))
            .unwrap();

        let outcome = store
            .replace_references(action.id, &[spec("R1", "owner", Some("ignored"))])
            .unwrap();
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.removed, 0);
        // No new events, and the stored value is untouched.
        assert_eq!(store.events_for_action(action.id).unwrap().len(), 1);
        assert_eq!(
            outcome.references[0].snapshot_value,
            Some(serde_json::json!("alice"))
        );
    }

    #[test]
    fn replace_with_empty_set_clears_snapshot() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .add_reference(action.id, &spec("R1", "owner", None))
            .unwrap();
        let outcome = store.replace_references(action.id, &[]).unwrap();
        assert_eq!(outcome.removed, 1);
        assert!(outcome.references.is_empty());
    }

    /// The §8 scenario: add (R1, owner), add (R2, owner), then PUT [R2] →
    /// {added: 0, removed: 1} and exactly one row remains.
    #[test]
    fn scenario_add_add_then_bulk_replace() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .add_reference(action.id, &spec("R1", "owner", None))
            .unwrap();
        assert_eq!(store.get_references(action.id).unwrap().len(), 1);

        store
            .add_reference(action.id, &spec("R2", "owner", None))
            .unwrap();
        assert_eq!(store.get_references(action.id).unwrap().len(), 2);

        let outcome = store
            .replace_references(action.id, &[spec("R2", "owner", None)])
            .unwrap();
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.removed, 1);

        let refs = store.get_references(action.id).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].key(), "R2|owner");
    }

    // -------- work lifecycle --------

    #[test]
    fn start_then_finish() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store.start_work(action.id).unwrap();
        assert_eq!(
            store.get_workflow(action.id).unwrap().status,
            WorkStatus::Active
        );
        store.finish_work(action.id).unwrap();
        assert_eq!(
            store.get_workflow(action.id).unwrap().status,
            WorkStatus::Finished
        );
    }

    #[test]
    fn workflow_defaults_to_pending_without_events() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        let node = store.get_workflow(action.id).unwrap();
        assert_eq!(node.status, WorkStatus::Pending);
        assert!(node.fields.is_empty());
    }

    #[test]
    fn start_while_blocked_emits_unblock_first() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .block_work(action.id, Some("waiting on approval".into()))
            .unwrap();
        let emitted = store.start_work(action.id).unwrap();
        let kinds: Vec<&str> = emitted.iter().map(|e| e.body.kind()).collect();
        assert_eq!(kinds, vec!["work_unblocked", "work_started"]);

        // The full log shows the unblock immediately before the start.
        let events = store.events_for_action(action.id).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.body.kind()).collect();
        assert_eq!(kinds, vec!["work_blocked", "work_unblocked", "work_started"]);
        assert_eq!(
            store.get_workflow(action.id).unwrap().status,
            WorkStatus::Active
        );
    }

    #[test]
    fn transitions_after_finish_conflict() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store.start_work(action.id).unwrap();
        store.finish_work(action.id).unwrap();

        assert!(matches!(
            store.start_work(action.id),
            Err(TrellisError::WorkFinished(_))
        ));
        assert!(matches!(
            store.block_work(action.id, None),
            Err(TrellisError::WorkFinished(_))
        ));
        assert!(matches!(
            store.finish_work(action.id),
            Err(TrellisError::WorkFinished(_))
        ));
    }

    #[test]
    fn stop_requires_active() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        assert!(matches!(
            store.stop_work(action.id),
            Err(TrellisError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn unblock_requires_blocked() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        assert!(matches!(
            store.unblock_work(action.id),
            Err(TrellisError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn block_stores_reason_in_node() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .block_work(action.id, Some("vendor outage".into()))
            .unwrap();
        let node = store.get_workflow(action.id).unwrap();
        assert_eq!(node.status, WorkStatus::Blocked);
        assert_eq!(node.blocked_reason.as_deref(), Some("vendor outage"));
    }

    #[test]
    fn declared_fields_reach_the_workflow_node() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .append(
                action.id,
                EventBody::ActionDeclared {
                    field_bindings: vec![FieldBinding::new("owner", serde_json::json!("alice"))],
                },
            )
            .unwrap();
        let node = store.get_workflow(action.id).unwrap();
        assert_eq!(node.fields.len(), 1);
        assert_eq!(node.fields[0].field_key, "owner");
    }

    // -------- rebuild --------

    #[test]
    fn rebuild_reproduces_snapshots_exactly() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .add_reference(action.id, &spec("R1", "owner", Some("alice")))
            .unwrap();
        store
            .add_reference(action.id, &spec("R2", "owner", None))
            .unwrap();
        store.remove_reference(action.id, "R1", "owner").unwrap();
        store.start_work(action.id).unwrap();

        let before_refs = store.get_references(action.id).unwrap();
        let before_node = store.get_workflow(action.id).unwrap();

        let report = store.rebuild_snapshots().unwrap();
        assert_eq!(report.actions, 1);
        assert_eq!(report.events, 4);

        let after_refs = store.get_references(action.id).unwrap();
        assert_eq!(after_refs.len(), before_refs.len());
        assert_eq!(after_refs[0].key(), before_refs[0].key());
        assert_eq!(after_refs[0].snapshot_value, before_refs[0].snapshot_value);
        assert_eq!(store.get_workflow(action.id).unwrap().status, before_node.status);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let (_dir, store) = open_tmp();
        let action = compose(&store);
        store
            .add_reference(action.id, &spec("R1", "owner", None))
            .unwrap();

        store.rebuild_snapshots().unwrap();
        store.rebuild_snapshots().unwrap();
        assert_eq!(store.get_references(action.id).unwrap().len(), 1);
    }

    #[test]
    fn rebuild_covers_multiple_actions() {
        let (_dir, store) = open_tmp();
        let a = compose(&store);
        let b = compose(&store);
        store.add_reference(a.id, &spec("R1", "owner", None)).unwrap();
        store.start_work(b.id).unwrap();

        let report = store.rebuild_snapshots().unwrap();
        assert_eq!(report.actions, 2);
        assert_eq!(store.get_references(a.id).unwrap().len(), 1);
        assert_eq!(store.get_workflow(b.id).unwrap().status, WorkStatus::Active);
    }

    #[test]
    fn rebuild_on_empty_log_reports_zero() {
        let (_dir, store) = open_tmp();
        let report = store.rebuild_snapshots().unwrap();
        assert_eq!(report.actions, 0);
        assert_eq!(report.events, 0);
    }
}
