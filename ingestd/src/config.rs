use std::{env, fs, net::SocketAddr, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Http {
    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub cors: bool,
    /// Upper bound for a single chunk request body.
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Holds `staging/` and `sessions/`; publication renames between the
    /// two, so they must share a filesystem.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_session_complete_timeout_secs")]
    pub session_complete_timeout_secs: u64,
    #[serde(default = "default_upload_session_timeout_secs")]
    pub upload_session_timeout_secs: u64,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Config {
    pub fn parse(path: Option<String>) -> Self {
        let result = fs::read_to_string(path.unwrap_or(String::from("ingestd.toml")))
            .or(fs::read_to_string("/etc/rignode/ingestd.toml"))
            .unwrap_or("".to_string());
        let cfg: Self = toml::from_str(result.as_str()).expect("config parse error");
        cfg
    }
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
            cors: Default::default(),
            max_chunk_bytes: default_max_chunk_bytes(),
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
            root: default_root(),
            session_complete_timeout_secs: default_session_complete_timeout_secs(),
            upload_session_timeout_secs: default_upload_session_timeout_secs(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from_str(&format!(
        "0.0.0.0:{}",
        env::var("PORT").unwrap_or(String::from("7800"))
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

fn default_root() -> PathBuf {
    PathBuf::from("./ingest")
}

fn default_session_complete_timeout_secs() -> u64 {
    2 * 60 * 60
}

fn default_upload_session_timeout_secs() -> u64 {
    60 * 60
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_max_chunk_bytes() -> usize {
    256 * 1024 * 1024
}
