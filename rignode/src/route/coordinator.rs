//! Cluster control API, identical shape on every node.

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};

use api::request::{ClusterStart, PeerAdd};
use api::response::{
    AggregateStatus, ClusterRecordings, ClusterStartResponse, ClusterStopResponse,
    ClusterSyncResponse, ClusterTestResponse, PeerInfo, PreflightReport, SessionInfo,
};

use crate::coordinator;
use crate::error::AppError;
use crate::result::Result;
use crate::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::COORDINATOR_STATUS, get(status))
        .route(api::path::COORDINATOR_PREFLIGHT, post(preflight))
        .route(api::path::COORDINATOR_START, post(start))
        .route(api::path::COORDINATOR_STOP, post(stop))
        .route(api::path::COORDINATOR_SYNC, post(sync))
        .route(api::path::COORDINATOR_TEST, post(test))
        .route(
            api::path::COORDINATOR_PEERS,
            get(peers_index).post(peer_add),
        )
        .route("/coordinator/peers/:node_id", delete(peer_remove))
        .route(api::path::COORDINATOR_RECORDINGS, get(recordings))
        .route(api::path::COORDINATOR_SESSIONS, get(sessions))
}

async fn status(State(state): State<AppState>) -> Json<AggregateStatus> {
    Json(coordinator::aggregate_status(&state).await)
}

async fn preflight(State(state): State<AppState>) -> Json<PreflightReport> {
    Json(coordinator::preflight(&state).await)
}

async fn start(
    State(state): State<AppState>,
    body: Option<Json<ClusterStart>>,
) -> Result<Json<ClusterStartResponse>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    Ok(Json(coordinator::cluster_start(&state, req).await?))
}

async fn stop(State(state): State<AppState>) -> Result<Json<ClusterStopResponse>> {
    Ok(Json(coordinator::cluster_stop(&state).await?))
}

async fn sync(State(state): State<AppState>) -> Json<ClusterSyncResponse> {
    Json(coordinator::cluster_sync(&state).await)
}

async fn test(State(state): State<AppState>) -> Json<ClusterTestResponse> {
    Json(coordinator::cluster_test(&state).await)
}

async fn peers_index(State(state): State<AppState>) -> Json<Vec<PeerInfo>> {
    Json(state.registry.infos())
}

async fn peer_add(
    State(state): State<AppState>,
    Json(req): Json<PeerAdd>,
) -> Json<serde_json::Value> {
    state.registry.add_manual(req.node_id, req.endpoint);
    Json(serde_json::json!({ "ok": true }))
}

async fn peer_remove(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<serde_json::Value>> {
    if state.registry.remove(&node_id) {
        Ok(Json(serde_json::json!({ "ok": true })))
    } else {
        Err(AppError::NotFound(format!("peer {} not registered", node_id)))
    }
}

async fn recordings(State(state): State<AppState>) -> Json<ClusterRecordings> {
    Json(coordinator::cluster_recordings(&state).await)
}

async fn sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(coordinator::session_history(&state))
}
