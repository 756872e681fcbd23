use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use trellis_core::reconcile::ReferenceSpec;

use crate::error::AppError;
use crate::state::AppState;

fn require_key(source_record_id: &str, target_field_key: &str) -> Result<(), AppError> {
    if source_record_id.trim().is_empty() {
        return Err(AppError::bad_request("sourceRecordId must not be empty"));
    }
    if target_field_key.trim().is_empty() {
        return Err(AppError::bad_request("targetFieldKey must not be empty"));
    }
    Ok(())
}

/// POST /actions/:id/references — attach a reference, emitting a
/// `reference_added` event.
pub async fn add_reference(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReferenceSpec>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    require_key(&body.source_record_id, &body.target_field_key)?;
    let store = app.store.clone();
    let event = tokio::task::spawn_blocking(move || store.add_reference(id, &body))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "event": event })),
    ))
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveReferenceBody {
    pub source_record_id: String,
    pub target_field_key: String,
}

/// POST /actions/:id/references/remove — detach a reference, emitting a
/// `reference_removed` event. Removing a key that is not present is a no-op
/// on the snapshot, not an error.
pub async fn remove_reference(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RemoveReferenceBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_key(&body.source_record_id, &body.target_field_key)?;
    let store = app.store.clone();
    let event = tokio::task::spawn_blocking(move || {
        store.remove_reference(id, body.source_record_id, body.target_field_key)
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok(Json(serde_json::json!({ "event": event })))
}

/// GET /actions/:id/references — the current reference snapshot.
pub async fn list_references(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let references = tokio::task::spawn_blocking(move || store.get_references(id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(serde_json::json!({ "references": references })))
}

#[derive(serde::Deserialize)]
pub struct ReplaceReferencesBody {
    pub references: Vec<ReferenceSpec>,
}

/// PUT /actions/:id/references — bulk replace: converge the snapshot to the
/// submitted set with the minimal event delta and return the re-read
/// snapshot plus counts.
pub async fn replace_references(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReplaceReferencesBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    for spec in &body.references {
        require_key(&spec.source_record_id, &spec.target_field_key)?;
    }
    let store = app.store.clone();
    let outcome = tokio::task::spawn_blocking(move || store.replace_references(id, &body.references))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok(Json(serde_json::json!({
        "references": outcome.references,
        "added": outcome.added,
        "removed": outcome.removed,
    })))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
