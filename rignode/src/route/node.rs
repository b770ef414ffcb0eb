//! Node-local control surface: recording state machine transitions plus
//! status and artifact listings.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;

use api::request;
use api::response::{
    ArmResponse, CameraStatus, NodeStatus, OffloadStatusReport, RecordingEntry, RecordingSummary,
    SelfTestReport, StartResponse, StorageStatus,
};

use crate::offload::OffloadJob;
use crate::result::Result;
use crate::{storage, system, AppState};

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::STATUS, get(status))
        .route(api::path::ARM, post(arm))
        .route(api::path::START, post(start))
        .route(api::path::STOP, post(stop))
        .route(api::path::ABORT, post(abort))
        .route(api::path::RESET, post(reset))
        .route(api::path::TEST, post(self_test))
        .route(api::path::RECORDINGS, get(recordings))
        .route(api::path::OFFLOAD_STATUS, get(offload_status))
}

pub async fn build_status(state: &AppState) -> NodeStatus {
    let recording = state.machine.snapshot().await;
    let (free_bytes, total_bytes) = system::storage_stats(&state.config.storage.recordings_root);
    NodeStatus {
        node_id: state.config.node.id.clone(),
        position: state.config.node.position,
        is_master: state.config.sync.is_master,
        endpoint: state.config.node.endpoint.clone(),
        camera: CameraStatus {
            detected: state.machine.camera_detected(),
            model: state.machine.camera_model(),
            temperature_c: system::temperature_c(),
        },
        recording,
        storage: StorageStatus {
            free_bytes,
            total_bytes,
            min_free_bytes: state.config.storage.min_free_bytes,
        },
        sync: state.sync.snapshot(),
        heartbeat_at: Utc::now(),
    }
}

async fn status(State(state): State<AppState>) -> Json<NodeStatus> {
    Json(build_status(&state).await)
}

async fn arm(
    State(state): State<AppState>,
    Json(req): Json<request::Arm>,
) -> Result<Json<ArmResponse>> {
    Ok(Json(state.machine.arm(req.session_id).await?))
}

async fn start(State(state): State<AppState>) -> Result<Json<StartResponse>> {
    Ok(Json(state.machine.start().await?))
}

async fn stop(
    State(state): State<AppState>,
    body: Option<Json<request::Stop>>,
) -> Result<Json<RecordingSummary>> {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    let summary = state.machine.stop(req.session_id).await?;
    if state.config.offload.auto_upload
        && state.offload.state_of(&summary.recording_id).is_none()
    {
        state.offload.enqueue(OffloadJob {
            recording_id: summary.recording_id.clone(),
            session_id: summary.session_id.clone(),
            node_id: summary.node_id.clone(),
            file_path: summary.file_path.clone().into(),
            manifest_path: summary.manifest_path.clone().into(),
        });
    }
    Ok(Json(summary))
}

async fn abort(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.machine.abort().await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn reset(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.machine.reset().await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn self_test(State(state): State<AppState>) -> Json<SelfTestReport> {
    Json(state.machine.self_test().await)
}

async fn recordings(State(state): State<AppState>) -> Result<Json<Vec<RecordingEntry>>> {
    let mut entries = storage::list_recordings(&state.config.storage.recordings_root).await?;
    for entry in &mut entries {
        if let Some(offload_state) = state.offload.state_of(&entry.recording_id) {
            entry.offload_state = offload_state;
        }
    }
    Ok(Json(entries))
}

async fn offload_status(State(state): State<AppState>) -> Json<OffloadStatusReport> {
    Json(state.offload.report().await)
}
