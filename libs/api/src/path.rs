//! URL paths shared by the node daemon, the ingest server and their clients.

pub const STATUS: &str = "/status";
pub const ARM: &str = "/arm";
pub const START: &str = "/start";
pub const STOP: &str = "/stop";
pub const ABORT: &str = "/abort";
pub const RESET: &str = "/reset";
pub const TEST: &str = "/test";
pub const RECORDINGS: &str = "/recordings";
pub const OFFLOAD_STATUS: &str = "/offload/status";

pub const SYNC_TRIGGER: &str = "/sync/trigger";
pub const SYNC_TIME: &str = "/sync/time";

pub const COORDINATOR_STATUS: &str = "/coordinator/status";
pub const COORDINATOR_PREFLIGHT: &str = "/coordinator/preflight";
pub const COORDINATOR_START: &str = "/coordinator/start";
pub const COORDINATOR_STOP: &str = "/coordinator/stop";
pub const COORDINATOR_SYNC: &str = "/coordinator/sync";
pub const COORDINATOR_TEST: &str = "/coordinator/test";
pub const COORDINATOR_PEERS: &str = "/coordinator/peers";
pub const COORDINATOR_RECORDINGS: &str = "/coordinator/recordings";
pub const COORDINATOR_SESSIONS: &str = "/coordinator/sessions";

pub fn coordinator_peer(node_id: &str) -> String {
    format!("/coordinator/peers/{}", node_id)
}

pub const UPLOAD_INIT: &str = "/upload/init";
pub const UPLOAD_CHUNK: &str = "/upload/chunk";
pub const UPLOAD_FINALIZE: &str = "/upload/finalize";
pub const UPLOAD_CONFIRM: &str = "/upload/confirm";
pub const HEALTH: &str = "/health";
pub const SESSIONS: &str = "/sessions";

pub fn session(session_id: &str) -> String {
    format!("/sessions/{}", session_id)
}

pub fn session_manifest(session_id: &str) -> String {
    format!("/sessions/{}/manifest", session_id)
}
