use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use api::request::SyncTimeQuery;
use api::response::{SyncStatus, SyncTimeResponse};

use crate::error::AppError;
use crate::result::Result;
use crate::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::SYNC_TRIGGER, post(trigger))
        .route(api::path::SYNC_TIME, get(time))
}

async fn trigger(State(state): State<AppState>) -> Result<Json<SyncStatus>> {
    if state.sync.is_master() {
        return Ok(Json(state.sync.snapshot()));
    }
    state
        .sync
        .sample()
        .await
        .map(Json)
        .map_err(|e| AppError::MasterUnreachable(e.to_string()))
}

/// Master clock endpoint queried by slaves. The caller's identity, when
/// present, feeds the registry's reverse-learning.
async fn time(
    State(state): State<AppState>,
    Query(query): Query<SyncTimeQuery>,
) -> Json<SyncTimeResponse> {
    let received_at_us = Utc::now().timestamp_micros();
    if let (Some(node_id), Some(endpoint)) = (query.node_id, query.endpoint) {
        state.registry.learn(node_id, endpoint);
    }
    Json(SyncTimeResponse {
        received_at_us,
        sent_at_us: Utc::now().timestamp_micros(),
    })
}
