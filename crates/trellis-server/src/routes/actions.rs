use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use trellis_core::event::EventBody;
use trellis_core::types::{ContextType, FieldBinding};

use crate::error::AppError;
use crate::state::AppState;

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeActionBody {
    pub context_id: String,
    pub context_type: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub field_bindings: Vec<FieldBinding>,
}

/// POST /actions — compose an action and record its declared fields as the
/// action's first event.
pub async fn compose_action(
    State(app): State<AppState>,
    Json(body): Json<ComposeActionBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if body.context_id.trim().is_empty() {
        return Err(AppError::bad_request("contextId must not be empty"));
    }
    if body.kind.trim().is_empty() {
        return Err(AppError::bad_request("type must not be empty"));
    }
    let context_type: ContextType = body.context_type.parse()?;

    let store = app.store.clone();
    let (action, event) = tokio::task::spawn_blocking(move || {
        let action = store.compose(
            body.context_id,
            context_type,
            body.kind,
            body.field_bindings.clone(),
        )?;
        let event = store.append(
            action.id,
            EventBody::ActionDeclared {
                field_bindings: body.field_bindings,
            },
        )?;
        Ok::<_, trellis_core::TrellisError>((action, event))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "action": action, "event": event })),
    ))
}

/// GET /actions/:id — fetch one action, retracted or not.
pub async fn get_action(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let action = tokio::task::spawn_blocking(move || store.get_action(id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(serde_json::json!({ "action": action })))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmendActionBody {
    pub field_bindings: Vec<FieldBinding>,
    pub reason: String,
}

/// POST /actions/:id/amend — replace field bindings, keeping the previous
/// intent in the amendment trail.
pub async fn amend_action(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AmendActionBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    if body.reason.trim().is_empty() {
        return Err(AppError::bad_request("reason must not be empty"));
    }
    let store = app.store.clone();
    let action =
        tokio::task::spawn_blocking(move || store.amend_action(id, body.field_bindings, body.reason))
            .await
            .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok(Json(serde_json::json!({ "action": action })))
}

/// POST /actions/:id/retract — terminal; the event log refuses appends for a
/// retracted action while its history stays queryable.
pub async fn retract_action(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let action = tokio::task::spawn_blocking(move || {
        store.retract_action(id)?;
        store.get_action(id)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok(Json(serde_json::json!({ "action": action })))
}

/// GET /actions/:id/events — the action's event history in fold order.
pub async fn list_events(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let events = tokio::task::spawn_blocking(move || store.events_for_action(id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(serde_json::json!({ "events": events })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
