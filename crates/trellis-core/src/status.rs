//! Status derivation: a pure fold from work-lifecycle events to a derived
//! [`WorkStatus`].
//!
//! The fold never rejects an event. Preconditions (terminal `finished`,
//! explicit unblock before restarting work) are enforced by the command layer
//! in [`crate::store`], which is the only place that appends work events.

use crate::event::{EventBody, StoredEvent};
use crate::types::{FieldBinding, WorkStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// WorkflowNode
// ---------------------------------------------------------------------------

/// The status-bearing read-model for one action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowNode {
    pub action_id: Uuid,
    pub status: WorkStatus,
    pub blocked_reason: Option<String>,
    /// Field values recorded by the action's declared intent.
    pub fields: Vec<FieldBinding>,
}

// ---------------------------------------------------------------------------
// StatusFold
// ---------------------------------------------------------------------------

/// Accumulator for the status state machine.
///
/// `pending` → `active` → `finished`, with `blocked` reachable from any
/// non-terminal state. `work_unblocked` restores the state implied by the
/// last non-blocked transition. Once `finished`, every further event is
/// ignored.
#[derive(Debug, Clone)]
pub struct StatusFold {
    status: WorkStatus,
    resume: WorkStatus,
    blocked_reason: Option<String>,
    fields: Vec<FieldBinding>,
}

impl Default for StatusFold {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusFold {
    pub fn new() -> Self {
        Self {
            status: WorkStatus::Pending,
            resume: WorkStatus::Pending,
            blocked_reason: None,
            fields: Vec::new(),
        }
    }

    pub fn status(&self) -> WorkStatus {
        self.status
    }

    pub fn apply(&mut self, body: &EventBody) {
        if self.status.is_terminal() {
            return;
        }
        match body {
            EventBody::ActionDeclared { field_bindings } => {
                self.fields = field_bindings.clone();
            }
            EventBody::WorkStarted => {
                self.status = WorkStatus::Active;
                self.blocked_reason = None;
            }
            EventBody::WorkStopped => {
                self.status = WorkStatus::Pending;
                self.blocked_reason = None;
            }
            EventBody::WorkFinished => {
                self.status = WorkStatus::Finished;
                self.blocked_reason = None;
            }
            EventBody::WorkBlocked { reason } => {
                if self.status != WorkStatus::Blocked {
                    self.resume = self.status;
                }
                self.status = WorkStatus::Blocked;
                self.blocked_reason = reason.clone();
            }
            EventBody::WorkUnblocked => {
                if self.status == WorkStatus::Blocked {
                    self.status = self.resume;
                    self.blocked_reason = None;
                }
            }
            EventBody::ReferenceAdded { .. } | EventBody::ReferenceRemoved { .. } => {}
        }
    }

    pub fn into_node(self, action_id: Uuid) -> WorkflowNode {
        WorkflowNode {
            action_id,
            status: self.status,
            blocked_reason: self.blocked_reason,
            fields: self.fields,
        }
    }
}

/// Fold an ordered event sequence from the initial `pending` state.
pub fn fold<'a>(events: impl IntoIterator<Item = &'a StoredEvent>) -> StatusFold {
    let mut acc = StatusFold::new();
    for event in events {
        acc.apply(&event.body);
    }
    acc
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
