use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use trellis_core::TrellisError;

// ---------------------------------------------------------------------------
// AppError — unified error type for HTTP responses
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    /// Construct a 400 Bad Request error with the given message.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(TrellisError::Validation(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if let Some(e) = self.0.downcast_ref::<TrellisError>() {
            match e {
                TrellisError::ActionNotFound(_) => StatusCode::NOT_FOUND,
                TrellisError::ActionRetracted(_)
                | TrellisError::AlreadyRetracted(_)
                | TrellisError::WorkFinished(_)
                | TrellisError::InvalidTransition { .. } => StatusCode::CONFLICT,
                TrellisError::Validation(_) => StatusCode::BAD_REQUEST,
                TrellisError::Storage(_) | TrellisError::Json(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            }
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
