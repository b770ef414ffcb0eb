use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    #[default]
    #[serde(rename = "idle")]
    Idle,
    #[serde(rename = "armed")]
    Armed,
    #[serde(rename = "recording")]
    Recording,
    #[serde(rename = "finalizing")]
    Finalizing,
    #[serde(rename = "error")]
    Error,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OffloadState {
    #[default]
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "uploading")]
    Uploading,
    #[serde(rename = "uploaded")]
    Uploaded,
    #[serde(rename = "confirmed")]
    Confirmed,
    #[serde(rename = "failed")]
    Failed,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncQuality {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[default]
    #[serde(rename = "fail")]
    Fail,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    #[default]
    #[serde(rename = "open")]
    Open,
    #[serde(rename = "closed")]
    Closed,
    #[serde(rename = "published")]
    Published,
    #[serde(rename = "partial")]
    Partial,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "left")]
    Left,
    #[default]
    #[serde(rename = "center")]
    Center,
    #[serde(rename = "right")]
    Right,
}

/// The machine-readable error body every service returns on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub position: Position,
    pub is_master: bool,
    pub endpoint: String,
    pub camera: CameraStatus,
    pub recording: RecordingStatus,
    pub storage: StorageStatus,
    pub sync: SyncStatus,
    pub heartbeat_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraStatus {
    pub detected: bool,
    pub model: String,
    pub temperature_c: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub state: RecordingState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStatus {
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub min_free_bytes: u64,
}

/// `offset_ms` and `rtt_ms` are absent until the first successful sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_master: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<f64>,
    pub quality: SyncQuality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmResponse {
    pub ok: bool,
    pub session_id: String,
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub recording_id: String,
    pub session_id: String,
    pub node_id: String,
    pub file_path: String,
    pub manifest_path: String,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub dropped_frames: u64,
    pub checksum_sha256: String,
    pub offload_state: OffloadState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingEntry {
    pub recording_id: String,
    pub session_id: String,
    pub node_id: String,
    pub file_path: String,
    pub size_bytes: u64,
    pub has_manifest: bool,
    pub offload_state: OffloadState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfTestReport {
    pub passed: bool,
    pub camera_detected: bool,
    pub recording_started: bool,
    pub recording_stopped: bool,
    pub file_created: bool,
    pub file_size_bytes: u64,
    pub duration_secs: f64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTimeResponse {
    /// Master wall clock when the request was read, unix microseconds.
    pub received_at_us: i64,
    /// Master wall clock just before the response was written.
    pub sent_at_us: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadJobStatus {
    pub recording_id: String,
    pub session_id: String,
    pub state: OffloadState,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadStatusReport {
    pub enabled: bool,
    pub server_url: String,
    pub server_healthy: bool,
    pub pending: usize,
    pub jobs: Vec<OffloadJobStatus>,
}

// ---------------------------------------------------------------------------
// Coordinator aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub node_id: String,
    pub endpoint: String,
    pub source: String,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    pub node_id: String,
    pub endpoint: String,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub nodes_online: usize,
    pub nodes_total: usize,
    pub all_online: bool,
    pub any_recording: bool,
    pub all_synced: bool,
    pub storage_free_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateStatus {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
    pub summary: ClusterSummary,
    pub cameras: Vec<PeerStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraPreflight {
    pub passed: bool,
    pub checks: Vec<PreflightCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightReport {
    pub passed: bool,
    pub timestamp: DateTime<Utc>,
    pub cameras: BTreeMap<String, CameraPreflight>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraStartOutcome {
    pub armed: bool,
    pub started: bool,
    pub aborted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStartResponse {
    pub success: bool,
    pub session_id: String,
    pub cameras: BTreeMap<String, CameraStartOutcome>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraStopOutcome {
    pub stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<RecordingSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStopResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub cameras: BTreeMap<String, CameraStopOutcome>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraSyncOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSyncResponse {
    pub success: bool,
    pub cameras: BTreeMap<String, CameraSyncOutcome>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraTestOutcome {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<SelfTestReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterTestResponse {
    pub all_passed: bool,
    pub cameras: BTreeMap<String, CameraTestOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecordings {
    pub total_count: usize,
    pub total_size_bytes: u64,
    pub cameras: BTreeMap<String, Vec<RecordingEntry>>,
}

// ---------------------------------------------------------------------------
// Ingest server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInitResponse {
    pub upload_id: String,
    pub received_chunks: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadChunkResponse {
    pub ok: bool,
    pub chunk_index: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFinalizeResponse {
    pub checksum_sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfirmResponse {
    pub checksum_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestHealth {
    pub storage_free_bytes: u64,
    pub active_uploads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCamera {
    pub node_id: String,
    pub confirmed: bool,
    pub has_manifest: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub expected_cameras: Vec<String>,
    pub cameras: Vec<SessionCamera>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListEntry {
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub recordings_count: usize,
}
