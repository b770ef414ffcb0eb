use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arm {
    pub session_id: String,
}

/// Body of a node `POST /stop`. `session_id` makes the idempotent replay
/// explicit; when absent the current recording is stopped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stop {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterStart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAdd {
    pub node_id: String,
    pub endpoint: String,
}

/// Query parameters a slave attaches to `GET /sync/time` so the master can
/// reverse-learn its origin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncTimeQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInit {
    pub node_id: String,
    pub session_id: String,
    pub recording_id: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFinalize {
    pub upload_id: String,
    pub total_chunks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfirm {
    pub session_id: String,
    pub node_id: String,
}
