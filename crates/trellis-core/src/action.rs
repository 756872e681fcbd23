use crate::types::{ContextType, FieldBinding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Amendment
// ---------------------------------------------------------------------------

/// An audit-visible change to an action's field bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Amendment {
    pub field_bindings: Vec<FieldBinding>,
    pub reason: String,
    pub amended_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A declared intent scoped to one hierarchy node. Events belong to exactly
/// one action; once `retracted_at` is set the action is terminal and the
/// event log refuses further appends for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: Uuid,
    pub context_id: String,
    pub context_type: ContextType,
    /// Tag naming the action kind (e.g. "assign-owner").
    #[serde(rename = "type")]
    pub kind: String,
    pub field_bindings: Vec<FieldBinding>,
    #[serde(default)]
    pub amendments: Vec<Amendment>,
    pub created_at: DateTime<Utc>,
    pub retracted_at: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(
        context_id: impl Into<String>,
        context_type: ContextType,
        kind: impl Into<String>,
        field_bindings: Vec<FieldBinding>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            context_id: context_id.into(),
            context_type,
            kind: kind.into(),
            field_bindings,
            amendments: Vec::new(),
            created_at: Utc::now(),
            retracted_at: None,
        }
    }

    pub fn is_retracted(&self) -> bool {
        self.retracted_at.is_some()
    }

    /// Replace the current bindings and record the previous intent in the
    /// amendment trail.
    pub fn amend(&mut self, field_bindings: Vec<FieldBinding>, reason: impl Into<String>) {
        self.amendments.push(Amendment {
            field_bindings: std::mem::replace(&mut self.field_bindings, field_bindings),
            reason: reason.into(),
            amended_at: Utc::now(),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(key: &str, value: &str) -> Vec<FieldBinding> {
        vec![FieldBinding::new(key, serde_json::json!(value))]
    }

    #[test]
    fn new_action_is_live() {
        let action = Action::new("C1", ContextType::Subprocess, "assign-owner", vec![]);
        assert!(!action.is_retracted());
        assert!(action.amendments.is_empty());
    }

    #[test]
    fn amend_keeps_previous_bindings_in_trail() {
        let mut action = Action::new(
            "C1",
            ContextType::Stage,
            "assign-owner",
            bindings("owner", "alice"),
        );
        action.amend(bindings("owner", "bob"), "ownership transferred");

        assert_eq!(action.field_bindings[0].value, serde_json::json!("bob"));
        assert_eq!(action.amendments.len(), 1);
        assert_eq!(
            action.amendments[0].field_bindings[0].value,
            serde_json::json!("alice")
        );
        assert_eq!(action.amendments[0].reason, "ownership transferred");
    }

    #[test]
    fn action_serializes_kind_as_type() {
        let action = Action::new("C1", ContextType::Task, "attach-evidence", vec![]);
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "attach-evidence");
        assert_eq!(json["contextType"], "task");
        assert!(json["retractedAt"].is_null());
    }
}
