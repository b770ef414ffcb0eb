use std::{env, fs, net::SocketAddr, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use api::response::Position;

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub offload: OffloadConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_id")]
    pub id: String,
    #[serde(default)]
    pub position: Position,
    /// Endpoint peers use to reach this node.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_software_version")]
    pub software_version: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Http {
    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_recordings_root")]
    pub recordings_root: PathBuf,
    #[serde(default = "default_min_free_bytes")]
    pub min_free_bytes: u64,
    #[serde(default)]
    pub delete_after_confirm: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub is_master: bool,
    /// Required on slaves; ignored on the master.
    #[serde(default)]
    pub master_endpoint: String,
    #[serde(default = "default_sync_tolerance_ms")]
    pub tolerance_ms: f64,
    #[serde(default = "default_sync_rtt_max_ms")]
    pub rtt_max_ms: f64,
    #[serde(default = "default_sync_stale_secs")]
    pub stale_secs: u64,
    #[serde(default = "default_sync_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverConfig {
    /// One of "simulated" or "fixture".
    #[serde(default = "default_driver_kind")]
    pub kind: String,
    #[serde(default = "default_container")]
    pub container: String,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_bitrate_mbps")]
    pub bitrate_mbps: u32,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
    #[serde(default = "default_test_duration_secs")]
    pub test_duration_secs: u64,
    /// Fixture driver only: report a write failure this long after start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OffloadConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_auto_upload")]
    pub auto_upload: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusterConfig {
    /// Static peer seeds (authoritative); should list every node in the rig,
    /// this one included.
    #[serde(default)]
    pub peers: Vec<PeerSeed>,
    #[serde(default = "default_min_participants")]
    pub min_participants: usize,
    #[serde(default = "default_arm_timeout_ms")]
    pub arm_timeout_ms: u64,
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_peer_timeout_secs")]
    pub peer_timeout_secs: u64,
    #[serde(default = "default_temperature_max_c")]
    pub temperature_max_c: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PeerSeed {
    pub node_id: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_discovery_port")]
    pub port: u16,
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,
}

impl Config {
    pub fn parse(path: Option<String>) -> Self {
        let result = fs::read_to_string(path.unwrap_or(String::from("rignode.toml")))
            .or(fs::read_to_string("/etc/rignode/rignode.toml"))
            .unwrap_or("".to_string());
        let cfg: Self = toml::from_str(result.as_str()).expect("config parse error");
        cfg
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
            position: Position::default(),
            endpoint: default_endpoint(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            software_version: default_software_version(),
        }
    }
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
            cors: Default::default(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            recordings_root: default_recordings_root(),
            min_free_bytes: default_min_free_bytes(),
            delete_after_confirm: false,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            is_master: false,
            master_endpoint: String::new(),
            tolerance_ms: default_sync_tolerance_ms(),
            rtt_max_ms: default_sync_rtt_max_ms(),
            stale_secs: default_sync_stale_secs(),
            interval_secs: default_sync_interval_secs(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            kind: default_driver_kind(),
            container: default_container(),
            codec: default_codec(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            bitrate_mbps: default_bitrate_mbps(),
            frame_interval_ms: default_frame_interval_ms(),
            stop_grace_secs: default_stop_grace_secs(),
            test_duration_secs: default_test_duration_secs(),
            fail_after_ms: None,
        }
    }
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            auto_upload: default_auto_upload(),
            chunk_size: default_chunk_size(),
            max_attempts: default_max_attempts(),
            retry_base_secs: default_retry_base_secs(),
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peers: vec![],
            min_participants: default_min_participants(),
            arm_timeout_ms: default_arm_timeout_ms(),
            start_timeout_ms: default_start_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            status_timeout_ms: default_status_timeout_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            peer_timeout_secs: default_peer_timeout_secs(),
            temperature_max_c: default_temperature_max_c(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_discovery_port(),
            announce_interval_secs: default_announce_interval_secs(),
        }
    }
}

fn default_node_id() -> String {
    env::var("NODE_ID").unwrap_or(String::from("CAM_C"))
}

fn default_endpoint() -> String {
    format!("http://127.0.0.1:{}", env::var("PORT").unwrap_or(String::from("7700")))
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from_str(&format!(
        "0.0.0.0:{}",
        env::var("PORT").unwrap_or(String::from("7700"))
    ))
    .expect("invalid listen address")
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_software_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_recordings_root() -> PathBuf {
    PathBuf::from("./recordings")
}

fn default_min_free_bytes() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_sync_tolerance_ms() -> f64 {
    5.0
}

fn default_sync_rtt_max_ms() -> f64 {
    50.0
}

fn default_sync_stale_secs() -> u64 {
    60
}

fn default_sync_interval_secs() -> u64 {
    10
}

fn default_driver_kind() -> String {
    "simulated".to_string()
}

fn default_container() -> String {
    "mp4".to_string()
}

fn default_codec() -> String {
    "h264".to_string()
}

fn default_width() -> u32 {
    3840
}

fn default_height() -> u32 {
    2160
}

fn default_fps() -> u32 {
    30
}

fn default_bitrate_mbps() -> u32 {
    30
}

fn default_frame_interval_ms() -> u64 {
    100
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_test_duration_secs() -> u64 {
    10
}

fn default_server_url() -> String {
    "http://127.0.0.1:7800".to_string()
}

fn default_auto_upload() -> bool {
    true
}

fn default_chunk_size() -> u64 {
    64 * 1024 * 1024
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base_secs() -> u64 {
    5
}

fn default_min_participants() -> usize {
    2
}

fn default_arm_timeout_ms() -> u64 {
    3000
}

fn default_start_timeout_ms() -> u64 {
    3000
}

fn default_stop_timeout_ms() -> u64 {
    20000
}

fn default_status_timeout_ms() -> u64 {
    1000
}

fn default_probe_interval_ms() -> u64 {
    2000
}

fn default_peer_timeout_secs() -> u64 {
    5
}

fn default_temperature_max_c() -> f32 {
    75.0
}

fn default_discovery_port() -> u16 {
    7701
}

fn default_announce_interval_secs() -> u64 {
    5
}
