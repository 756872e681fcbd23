//! Event model: the closed set of facts the log accepts.
//!
//! Every payload shape is a variant of [`EventBody`]; malformed payloads are
//! rejected at the serde boundary before anything reaches a projector. The
//! wire form is `{"type": "<kind>", "payload": {...}}`.

use crate::types::{ContextType, FieldBinding, RefMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EventBody
// ---------------------------------------------------------------------------

/// Kind tag plus kind-specific payload of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum EventBody {
    /// Initial event recording the fields declared at compose time.
    ActionDeclared { field_bindings: Vec<FieldBinding> },
    /// The action now points at `source_record_id` / `target_field_key`.
    ReferenceAdded {
        source_record_id: String,
        target_field_key: String,
        mode: RefMode,
        snapshot_value: Option<serde_json::Value>,
    },
    /// The reference identified by the composite key is gone.
    ReferenceRemoved {
        source_record_id: String,
        target_field_key: String,
    },
    WorkStarted,
    WorkStopped,
    WorkFinished,
    WorkBlocked { reason: Option<String> },
    WorkUnblocked,
}

impl EventBody {
    pub fn kind(&self) -> &'static str {
        match self {
            EventBody::ActionDeclared { .. } => "action_declared",
            EventBody::ReferenceAdded { .. } => "reference_added",
            EventBody::ReferenceRemoved { .. } => "reference_removed",
            EventBody::WorkStarted => "work_started",
            EventBody::WorkStopped => "work_stopped",
            EventBody::WorkFinished => "work_finished",
            EventBody::WorkBlocked { .. } => "work_blocked",
            EventBody::WorkUnblocked => "work_unblocked",
        }
    }

    pub fn is_work_event(&self) -> bool {
        matches!(
            self,
            EventBody::WorkStarted
                | EventBody::WorkStopped
                | EventBody::WorkFinished
                | EventBody::WorkBlocked { .. }
                | EventBody::WorkUnblocked
        )
    }
}

// ---------------------------------------------------------------------------
// StoredEvent
// ---------------------------------------------------------------------------

/// An event as persisted by the log: stamped with identity, context, and a
/// per-action sequence number. Never mutated after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub id: Uuid,
    pub action_id: Uuid,
    pub context_id: String,
    pub context_type: ContextType,
    /// Fold-order key, monotonic within `action_id`.
    pub seq: u64,
    #[serde(flatten)]
    pub body: EventBody,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
