use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TrellisError {
    #[error("action not found: {0}")]
    ActionNotFound(Uuid),

    #[error("action retracted: {0}")]
    ActionRetracted(Uuid),

    #[error("action already retracted: {0}")]
    AlreadyRetracted(Uuid),

    #[error("work already finished for action {0}")]
    WorkFinished(Uuid),

    #[error("invalid work transition: {event} while {status}")]
    InvalidTransition {
        status: &'static str,
        event: &'static str,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrellisError>;
