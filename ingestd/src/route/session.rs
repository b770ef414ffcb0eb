use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use api::response::{IngestHealth, SessionDetail, SessionListEntry};

use crate::result::Result;
use crate::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::HEALTH, get(health))
        .route(api::path::SESSIONS, get(list))
        .route("/sessions/:session_id", get(detail))
        .route("/sessions/:session_id/manifest", post(manifest))
}

async fn health(State(state): State<AppState>) -> Json<IngestHealth> {
    Json(state.store.health().await)
}

async fn list(State(state): State<AppState>) -> Json<Vec<SessionListEntry>> {
    Json(state.store.list_sessions().await)
}

async fn detail(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetail>> {
    Ok(Json(state.store.session_detail(&session_id).await?))
}

async fn manifest(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>> {
    state.store.put_manifest(&session_id, value).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
