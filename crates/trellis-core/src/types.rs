use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ContextType
// ---------------------------------------------------------------------------

/// The hierarchy node kind an action or event is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Project,
    Process,
    Subprocess,
    Stage,
    Task,
}

impl ContextType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextType::Project => "project",
            ContextType::Process => "process",
            ContextType::Subprocess => "subprocess",
            ContextType::Stage => "stage",
            ContextType::Task => "task",
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContextType {
    type Err = crate::error::TrellisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(ContextType::Project),
            "process" => Ok(ContextType::Process),
            "subprocess" => Ok(ContextType::Subprocess),
            "stage" => Ok(ContextType::Stage),
            "task" => Ok(ContextType::Task),
            _ => Err(crate::error::TrellisError::Validation(format!(
                "unknown context type: {s}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkStatus
// ---------------------------------------------------------------------------

/// Derived work status of an action. Never written directly — always the
/// result of folding work-lifecycle events in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Pending,
    Active,
    Blocked,
    Finished,
}

impl WorkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::Active => "active",
            WorkStatus::Blocked => "blocked",
            WorkStatus::Finished => "finished",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WorkStatus::Finished)
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RefMode
// ---------------------------------------------------------------------------

/// How a reference tracks its source field: `Static` captures the value at
/// creation time, `Dynamic` follows the live field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefMode {
    Static,
    Dynamic,
}

// ---------------------------------------------------------------------------
// FieldBinding
// ---------------------------------------------------------------------------

/// An ordered `{fieldKey, value}` pair declared on an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldBinding {
    pub field_key: String,
    pub value: serde_json::Value,
}

impl FieldBinding {
    pub fn new(field_key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            field_key: field_key.into(),
            value,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
