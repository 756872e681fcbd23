use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// POST /actions/:id/work/start — move to `active`. A blocked action gets a
/// `work_unblocked` event immediately before `work_started`.
pub async fn start_work(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        let events = store.start_work(id)?;
        let node = store.get_workflow(id)?;
        Ok::<_, trellis_core::TrellisError>(serde_json::json!({
            "status": node.status,
            "events": events,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok(Json(result))
}

/// POST /actions/:id/work/stop — move back to `pending`.
pub async fn stop_work(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        let events = store.stop_work(id)?;
        let node = store.get_workflow(id)?;
        Ok::<_, trellis_core::TrellisError>(serde_json::json!({
            "status": node.status,
            "events": events,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok(Json(result))
}

/// POST /actions/:id/work/finish — terminal transition.
pub async fn finish_work(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        let events = store.finish_work(id)?;
        let node = store.get_workflow(id)?;
        Ok::<_, trellis_core::TrellisError>(serde_json::json!({
            "status": node.status,
            "events": events,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok(Json(result))
}

#[derive(serde::Deserialize, Default)]
pub struct BlockWorkBody {
    pub reason: Option<String>,
}

/// POST /actions/:id/work/block — mark blocked, with an optional reason.
pub async fn block_work(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<BlockWorkBody>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reason = body.and_then(|Json(b)| b.reason);
    let store = app.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        let events = store.block_work(id, reason)?;
        let node = store.get_workflow(id)?;
        Ok::<_, trellis_core::TrellisError>(serde_json::json!({
            "status": node.status,
            "blockedReason": node.blocked_reason,
            "events": events,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok(Json(result))
}

/// POST /actions/:id/work/unblock — explicit exit from `blocked`.
pub async fn unblock_work(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        let events = store.unblock_work(id)?;
        let node = store.get_workflow(id)?;
        Ok::<_, trellis_core::TrellisError>(serde_json::json!({
            "status": node.status,
            "events": events,
        }))
    })
    .await
    .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    app.notify();

    Ok(Json(result))
}

/// GET /actions/:id/status — the derived workflow-surface node.
pub async fn get_status(
    State(app): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = app.store.clone();
    let node = tokio::task::spawn_blocking(move || store.get_workflow(id))
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;

    Ok(Json(serde_json::json!(node)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
