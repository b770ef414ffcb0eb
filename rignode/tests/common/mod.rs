use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use tokio::net::TcpListener;

use rignode::config::{Config, PeerSeed};

pub struct NodeSpec {
    pub id: &'static str,
    pub port: u16,
}

impl NodeSpec {
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }
}

pub fn pick_ports(count: usize) -> Vec<u16> {
    let mut ports = std::collections::BTreeSet::new();
    while ports.len() < count {
        ports.insert(portpicker::pick_unused_port().expect("pick unused port"));
    }
    ports.into_iter().collect()
}

pub fn node_config(
    spec: &NodeSpec,
    master: &NodeSpec,
    peers: &[NodeSpec],
    root: &Path,
) -> Config {
    let mut cfg = Config::default();
    cfg.node.id = spec.id.to_string();
    cfg.node.endpoint = spec.endpoint();
    cfg.http.listen = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), spec.port);
    cfg.storage.recordings_root = root.join(spec.id);
    cfg.storage.min_free_bytes = 0;
    cfg.sync.is_master = spec.id == master.id;
    cfg.sync.master_endpoint = master.endpoint();
    cfg.sync.interval_secs = 1;
    cfg.driver.kind = "fixture".to_string();
    cfg.driver.frame_interval_ms = 10;
    cfg.driver.stop_grace_secs = 2;
    cfg.driver.test_duration_secs = 1;
    cfg.offload.auto_upload = false;
    cfg.cluster.peers = peers
        .iter()
        .map(|p| PeerSeed {
            node_id: p.id.to_string(),
            endpoint: p.endpoint(),
        })
        .collect();
    cfg
}

pub async fn spawn_node(cfg: Config) {
    let listener = TcpListener::bind(cfg.http.listen).await.unwrap();
    tokio::spawn(rignode::serve(cfg, listener, std::future::pending()));
}

/// Force a sync pass so slaves pass the arm gate deterministically.
pub async fn trigger_sync(client: &reqwest::Client, endpoint: &str) {
    let resp = client
        .post(format!("{}{}", endpoint, api::path::SYNC_TRIGGER))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "sync trigger failed");
}
