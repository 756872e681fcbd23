pub mod error;
pub mod routes;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use trellis_core::store::Store;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(store: Arc<Store>) -> Router {
    let app_state = state::AppState::new(store);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/events/stream", get(routes::events::sse_events))
        // Actions
        .route("/actions", post(routes::actions::compose_action))
        .route("/actions/{id}", get(routes::actions::get_action))
        .route("/actions/{id}/amend", post(routes::actions::amend_action))
        .route(
            "/actions/{id}/retract",
            post(routes::actions::retract_action),
        )
        .route("/actions/{id}/events", get(routes::actions::list_events))
        // References
        .route(
            "/actions/{id}/references",
            post(routes::references::add_reference),
        )
        .route(
            "/actions/{id}/references/remove",
            post(routes::references::remove_reference),
        )
        .route(
            "/actions/{id}/references",
            get(routes::references::list_references),
        )
        .route(
            "/actions/{id}/references",
            put(routes::references::replace_references),
        )
        // Work lifecycle
        .route("/actions/{id}/work/start", post(routes::work::start_work))
        .route("/actions/{id}/work/stop", post(routes::work::stop_work))
        .route("/actions/{id}/work/finish", post(routes::work::finish_work))
        .route("/actions/{id}/work/block", post(routes::work::block_work))
        .route(
            "/actions/{id}/work/unblock",
            post(routes::work::unblock_work),
        )
        .route("/actions/{id}/status", get(routes::work::get_status))
        .layer(cors)
        .with_state(app_state)
}

/// Start the trellis API server on `addr`, backed by the database at `db_path`.
pub async fn serve(db_path: &Path, port: u16) -> anyhow::Result<()> {
    let store = Arc::new(Store::open(db_path)?);
    let app = build_router(store);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("trellis API server listening on http://localhost:{port}");

    axum::serve(listener, app).await?;
    Ok(())
}
