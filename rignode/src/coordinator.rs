//! Cluster control plane. Runs on every node; whichever node the dashboard
//! addresses orchestrates that request by fanning out to all registry peers
//! (itself included, over loopback). It keeps no replicated state — only a
//! local session log for the dashboard.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use api::request::{Arm, ClusterStart, Stop};
use api::response::{
    AggregateStatus, ArmResponse, CameraPreflight, CameraStartOutcome, CameraStopOutcome,
    CameraSyncOutcome, CameraTestOutcome, ClusterRecordings, ClusterStartResponse,
    ClusterStopResponse, ClusterSummary, ClusterSyncResponse, ClusterTestResponse, ErrorBody,
    NodeStatus, PeerStatus, PreflightCheck, PreflightReport, RecordingEntry, RecordingState,
    RecordingSummary, SelfTestReport, SessionInfo, SessionStatus, SyncQuality, SyncStatus,
};
use api::session;

use crate::error::AppError;
use crate::registry::Peer;
use crate::result::Result;
use crate::AppState;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Sessions this coordinator has orchestrated, newest last.
#[derive(Default)]
pub struct SessionLog {
    pub current: Option<SessionInfo>,
    pub history: Vec<SessionInfo>,
}

impl SessionLog {
    pub fn close_current(&mut self) {
        if let Some(mut session) = self.current.take() {
            session.status = SessionStatus::Closed;
            session.ended_at = Some(Utc::now());
            self.history.push(session);
            if self.history.len() > 20 {
                let drop = self.history.len() - 20;
                self.history.drain(..drop);
            }
        }
    }
}

#[derive(Debug)]
enum PeerError {
    Unreachable(String),
    Api { tag: String, message: String },
}

impl PeerError {
    fn tag(&self) -> String {
        match self {
            PeerError::Unreachable(_) => "peer_unreachable".to_string(),
            PeerError::Api { tag, .. } => tag.clone(),
        }
    }

    fn describe(&self) -> String {
        match self {
            PeerError::Unreachable(m) => format!("peer_unreachable: {}", m),
            PeerError::Api { tag, message } => format!("{}: {}", tag, message),
        }
    }
}

async fn peer_get<T: DeserializeOwned>(
    client: &reqwest::Client,
    peer: &Peer,
    path: &str,
    timeout: Duration,
) -> std::result::Result<T, PeerError> {
    let url = format!("{}{}", peer.endpoint, path);
    let resp = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| PeerError::Unreachable(e.to_string()))?;
    decode(resp).await
}

async fn peer_post<B: Serialize, T: DeserializeOwned>(
    client: &reqwest::Client,
    peer: &Peer,
    path: &str,
    body: &B,
    timeout: Duration,
) -> std::result::Result<T, PeerError> {
    let url = format!("{}{}", peer.endpoint, path);
    let resp = client
        .post(url)
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| PeerError::Unreachable(e.to_string()))?;
    decode(resp).await
}

async fn decode<T: DeserializeOwned>(
    resp: reqwest::Response,
) -> std::result::Result<T, PeerError> {
    let status = resp.status();
    if status.is_success() {
        resp.json::<T>().await.map_err(|e| PeerError::Api {
            tag: "bad_response".to_string(),
            message: e.to_string(),
        })
    } else {
        let body = resp.json::<ErrorBody>().await.ok();
        Err(PeerError::Api {
            tag: body
                .as_ref()
                .map(|b| b.error.clone())
                .unwrap_or_else(|| format!("http_{}", status.as_u16())),
            message: body.map(|b| b.message).unwrap_or_default(),
        })
    }
}

/// Parallel `GET /status` sweep with the short probe timeout; feeds the
/// registry as a side effect.
async fn status_sweep(state: &AppState) -> Vec<(Peer, Option<NodeStatus>)> {
    let timeout = Duration::from_millis(state.config.cluster.status_timeout_ms);
    let peers = state.registry.snapshot();
    let results = join_all(peers.into_iter().map(|peer| {
        let client = state.client.clone();
        async move {
            let status = peer_get::<NodeStatus>(&client, &peer, api::path::STATUS, timeout)
                .await
                .ok();
            (peer, status)
        }
    }))
    .await;
    for (peer, status) in &results {
        state.registry.record_probe(&peer.node_id, status.clone());
    }
    results
}

pub async fn aggregate_status(state: &AppState) -> AggregateStatus {
    let sweep = status_sweep(state).await;
    let nodes_total = sweep.len();
    let mut nodes_online = 0;
    let mut any_recording = false;
    let mut all_synced = true;
    let mut storage_free_bytes = 0;
    let mut cameras = vec![];
    for (peer, status) in sweep {
        let online = status.is_some();
        if online {
            nodes_online += 1;
        }
        if let Some(status) = &status {
            if status.recording.state == RecordingState::Recording {
                any_recording = true;
            }
            if status.sync.quality != SyncQuality::Ok {
                all_synced = false;
            }
            storage_free_bytes += status.storage.free_bytes;
        } else {
            all_synced = false;
        }
        cameras.push(PeerStatus {
            node_id: peer.node_id,
            endpoint: peer.endpoint,
            online,
            status,
        });
    }
    AggregateStatus {
        timestamp: Utc::now(),
        session: state.sessions.read().unwrap().current.clone(),
        summary: ClusterSummary {
            nodes_online,
            nodes_total,
            all_online: nodes_online == nodes_total,
            any_recording,
            all_synced,
            storage_free_bytes,
        },
        cameras,
    }
}

/// Read-only admission checks across the cluster. Never mutates any node.
pub async fn preflight(state: &AppState) -> PreflightReport {
    let sweep = status_sweep(state).await;
    let temperature_max = state.config.cluster.temperature_max_c;
    let mut cameras = BTreeMap::new();
    let mut passed = true;

    for (peer, status) in sweep {
        let mut checks = vec![];
        match status {
            None => {
                checks.push(PreflightCheck {
                    name: "online".to_string(),
                    passed: false,
                    message: "status: offline".to_string(),
                });
            }
            Some(status) => {
                checks.push(PreflightCheck {
                    name: "online".to_string(),
                    passed: true,
                    message: "status: online".to_string(),
                });
                checks.push(PreflightCheck {
                    name: "camera".to_string(),
                    passed: status.camera.detected,
                    message: if status.camera.detected {
                        format!("camera detected: {}", status.camera.model)
                    } else {
                        "camera not detected".to_string()
                    },
                });
                let storage_ok = status.storage.free_bytes >= status.storage.min_free_bytes;
                checks.push(PreflightCheck {
                    name: "storage".to_string(),
                    passed: storage_ok,
                    message: format!(
                        "{:.1} GiB free, need {:.1}",
                        status.storage.free_bytes as f64 / GIB,
                        status.storage.min_free_bytes as f64 / GIB
                    ),
                });
                let sync_ok = status.sync.quality == SyncQuality::Ok;
                checks.push(PreflightCheck {
                    name: "sync".to_string(),
                    passed: sync_ok,
                    message: match status.sync.offset_ms {
                        Some(offset) => format!(
                            "offset: {:.2} ms ({})",
                            offset,
                            if sync_ok { "ok" } else { "out of sync" }
                        ),
                        None => "no sync data".to_string(),
                    },
                });
                let temp_ok = status.camera.temperature_c <= temperature_max;
                checks.push(PreflightCheck {
                    name: "temperature".to_string(),
                    passed: temp_ok,
                    message: format!("{:.1} C", status.camera.temperature_c),
                });
            }
        }
        let camera_passed = checks.iter().all(|c| c.passed);
        passed = passed && camera_passed;
        cameras.insert(
            peer.node_id,
            CameraPreflight {
                passed: camera_passed,
                checks,
            },
        );
    }

    PreflightReport {
        passed,
        timestamp: Utc::now(),
        cameras,
    }
}

/// Two-phase cluster start: arm everywhere, abort everyone on any arm
/// failure, otherwise fire start in parallel.
pub async fn cluster_start(state: &AppState, req: ClusterStart) -> Result<ClusterStartResponse> {
    let session_id = match req.session_id {
        Some(id) => {
            if !session::is_valid(&id) {
                return Err(AppError::bad_request(format!(
                    "session id {:?} does not match ^[A-Za-z0-9_]{{3,64}}$",
                    id
                )));
            }
            id
        }
        None => session::generate(state.sync.master_now()),
    };
    if let Some(current) = &state.sessions.read().unwrap().current {
        if current.status == SessionStatus::Open {
            return Err(AppError::conflict(format!(
                "session {} already in progress",
                current.session_id
            )));
        }
    }

    let peers = state.registry.snapshot();
    if peers.is_empty() {
        return Err(AppError::precondition("no peers registered"));
    }
    let arm_timeout = Duration::from_millis(state.config.cluster.arm_timeout_ms);
    let start_timeout = Duration::from_millis(state.config.cluster.start_timeout_ms);

    let mut cameras: BTreeMap<String, CameraStartOutcome> = peers
        .iter()
        .map(|p| (p.node_id.clone(), CameraStartOutcome::default()))
        .collect();

    // phase 1: arm
    let arm_body = Arm {
        session_id: session_id.clone(),
    };
    let arm_results = join_all(peers.iter().map(|peer| {
        let client = state.client.clone();
        let body = arm_body.clone();
        async move {
            let result =
                peer_post::<_, ArmResponse>(&client, peer, api::path::ARM, &body, arm_timeout)
                    .await;
            (peer.clone(), result)
        }
    }))
    .await;

    let mut armed = vec![];
    let mut arm_failed = false;
    for (peer, result) in arm_results {
        let outcome = cameras.get_mut(&peer.node_id).expect("seeded outcome");
        match result {
            Ok(_) => {
                outcome.armed = true;
                armed.push(peer);
            }
            Err(e) => {
                warn!(node_id = peer.node_id, "arm failed: {}", e.describe());
                outcome.error = Some(e.tag());
                arm_failed = true;
            }
        }
    }

    if arm_failed {
        // roll the armed nodes back; nothing has started yet
        let abort_results = join_all(armed.iter().map(|peer| {
            let client = state.client.clone();
            async move {
                let result = peer_post::<_, serde_json::Value>(
                    &client,
                    peer,
                    api::path::ABORT,
                    &serde_json::json!({}),
                    arm_timeout,
                )
                .await;
                (peer.node_id.clone(), result)
            }
        }))
        .await;
        for (node_id, result) in abort_results {
            let outcome = cameras.get_mut(&node_id).expect("seeded outcome");
            match result {
                Ok(_) => outcome.aborted = true,
                Err(e) => {
                    warn!(node_id, "abort after failed arm also failed: {}", e.describe())
                }
            }
        }
        return Ok(ClusterStartResponse {
            success: false,
            session_id,
            cameras,
        });
    }

    // phase 2: start, as close to simultaneous as the network allows
    let start_results = join_all(armed.iter().map(|peer| {
        let client = state.client.clone();
        async move {
            let result = peer_post::<_, api::response::StartResponse>(
                &client,
                peer,
                api::path::START,
                &serde_json::json!({}),
                start_timeout,
            )
            .await;
            (peer.node_id.clone(), result)
        }
    }))
    .await;

    let mut participants = vec![];
    let mut first_started_at = None;
    for (node_id, result) in start_results {
        let outcome = cameras.get_mut(&node_id).expect("seeded outcome");
        match result {
            Ok(resp) => {
                outcome.started = true;
                outcome.started_at = Some(resp.started_at);
                if first_started_at.map(|t| resp.started_at < t).unwrap_or(true) {
                    first_started_at = Some(resp.started_at);
                }
                participants.push(node_id);
            }
            Err(e) => {
                warn!(node_id, "start failed: {}", e.describe());
                outcome.error = Some(e.tag());
            }
        }
    }
    participants.sort();

    let success = participants.len() >= state.config.cluster.min_participants;
    if !participants.is_empty() {
        let mut log = state.sessions.write().unwrap();
        log.current = Some(SessionInfo {
            session_id: session_id.clone(),
            status: SessionStatus::Open,
            started_at: first_started_at,
            ended_at: None,
            participants: participants.clone(),
        });
    }
    info!(
        session_id,
        participants = participants.len(),
        success,
        "cluster start"
    );

    Ok(ClusterStartResponse {
        success,
        session_id,
        cameras,
    })
}

/// Fan-out stop to every node believed to be recording (current
/// participants plus anything a live sweep finds in RECORDING).
pub async fn cluster_stop(state: &AppState) -> Result<ClusterStopResponse> {
    let session = state.sessions.read().unwrap().current.clone();
    let sweep = status_sweep(state).await;

    let mut targets: Vec<Peer> = vec![];
    for (peer, status) in &sweep {
        let participant = session
            .as_ref()
            .map(|s| s.participants.contains(&peer.node_id))
            .unwrap_or(false);
        let recording = status
            .as_ref()
            .map(|s| s.recording.state == RecordingState::Recording)
            .unwrap_or(false);
        if participant || recording {
            targets.push(peer.clone());
        }
    }
    if targets.is_empty() {
        return Err(AppError::conflict("no recording in progress"));
    }

    let stop_timeout = Duration::from_millis(state.config.cluster.stop_timeout_ms);
    let body = Stop {
        session_id: session.as_ref().map(|s| s.session_id.clone()),
    };
    let results = join_all(targets.iter().map(|peer| {
        let client = state.client.clone();
        let body = body.clone();
        async move {
            let result = peer_post::<_, RecordingSummary>(
                &client,
                peer,
                api::path::STOP,
                &body,
                stop_timeout,
            )
            .await;
            (peer.node_id.clone(), result)
        }
    }))
    .await;

    let mut cameras = BTreeMap::new();
    let mut success = true;
    for (node_id, result) in results {
        let outcome = match result {
            Ok(summary) => CameraStopOutcome {
                stopped: true,
                recording: Some(summary),
                error: None,
            },
            Err(e) => {
                success = false;
                warn!(node_id, "stop failed: {}", e.describe());
                CameraStopOutcome {
                    stopped: false,
                    recording: None,
                    error: Some(e.describe()),
                }
            }
        };
        cameras.insert(node_id, outcome);
    }

    let session_id = session.map(|s| s.session_id);
    state.sessions.write().unwrap().close_current();

    Ok(ClusterStopResponse {
        success,
        session_id,
        cameras,
    })
}

pub async fn cluster_sync(state: &AppState) -> ClusterSyncResponse {
    let peers = state.registry.snapshot();
    let timeout = Duration::from_secs(5);
    let results = join_all(peers.iter().map(|peer| {
        let client = state.client.clone();
        async move {
            let result = peer_post::<_, SyncStatus>(
                &client,
                peer,
                api::path::SYNC_TRIGGER,
                &serde_json::json!({}),
                timeout,
            )
            .await;
            (peer.node_id.clone(), result)
        }
    }))
    .await;

    let mut cameras = BTreeMap::new();
    let mut success = true;
    for (node_id, result) in results {
        let outcome = match result {
            Ok(sync) => CameraSyncOutcome {
                success: true,
                sync: Some(sync),
                error: None,
            },
            Err(e) => {
                success = false;
                CameraSyncOutcome {
                    success: false,
                    sync: None,
                    error: Some(e.describe()),
                }
            }
        };
        cameras.insert(node_id, outcome);
    }
    ClusterSyncResponse { success, cameras }
}

pub async fn cluster_test(state: &AppState) -> ClusterTestResponse {
    let peers = state.registry.snapshot();
    let timeout = Duration::from_secs(state.config.driver.test_duration_secs + 30);
    let results = join_all(peers.iter().map(|peer| {
        let client = state.client.clone();
        async move {
            let result = peer_post::<_, SelfTestReport>(
                &client,
                peer,
                api::path::TEST,
                &serde_json::json!({}),
                timeout,
            )
            .await;
            (peer.node_id.clone(), result)
        }
    }))
    .await;

    let mut cameras = BTreeMap::new();
    let mut all_passed = true;
    for (node_id, result) in results {
        let outcome = match result {
            Ok(report) => {
                all_passed = all_passed && report.passed;
                CameraTestOutcome {
                    passed: report.passed,
                    report: Some(report),
                    error: None,
                }
            }
            Err(e) => {
                all_passed = false;
                CameraTestOutcome {
                    passed: false,
                    report: None,
                    error: Some(e.describe()),
                }
            }
        };
        cameras.insert(node_id, outcome);
    }
    ClusterTestResponse {
        all_passed,
        cameras,
    }
}

pub async fn cluster_recordings(state: &AppState) -> ClusterRecordings {
    let peers = state.registry.snapshot();
    let timeout = Duration::from_secs(5);
    let results = join_all(peers.iter().map(|peer| {
        let client = state.client.clone();
        async move {
            let result = peer_get::<Vec<RecordingEntry>>(
                &client,
                peer,
                api::path::RECORDINGS,
                timeout,
            )
            .await;
            (peer.node_id.clone(), result)
        }
    }))
    .await;

    let mut cameras = BTreeMap::new();
    let mut total_count = 0;
    let mut total_size_bytes = 0;
    for (node_id, result) in results {
        let entries = result.unwrap_or_default();
        total_count += entries.len();
        total_size_bytes += entries.iter().map(|e| e.size_bytes).sum::<u64>();
        cameras.insert(node_id, entries);
    }
    ClusterRecordings {
        total_count,
        total_size_bytes,
        cameras,
    }
}

pub fn session_history(state: &AppState) -> Vec<SessionInfo> {
    let log = state.sessions.read().unwrap();
    let mut sessions = log.history.clone();
    if let Some(current) = &log.current {
        sessions.push(current.clone());
    }
    sessions.reverse();
    sessions
}
