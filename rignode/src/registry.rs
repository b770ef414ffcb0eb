//! Peer registry. Entry sources in precedence order: static configuration,
//! LAN broadcast discovery, reverse-learning from inbound sync queries. The
//! local node is kept in the registry too so coordinator fan-out treats
//! every camera uniformly.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use api::response::{NodeStatus, PeerInfo};

use crate::config::Config;

/// Broadcast discovery datagram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announce {
    pub node_id: String,
    pub endpoint: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PeerSource {
    Static,
    Discovered,
    Learned,
}

impl PeerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerSource::Static => "static",
            PeerSource::Discovered => "discovered",
            PeerSource::Learned => "learned",
        }
    }
}

#[derive(Clone)]
pub struct Peer {
    pub node_id: String,
    pub endpoint: String,
    pub source: PeerSource,
    pub last_seen: Option<Instant>,
    pub last_seen_wall: Option<DateTime<Utc>>,
    pub status: Option<NodeStatus>,
}

impl Peer {
    fn new(node_id: String, endpoint: String, source: PeerSource) -> Self {
        Self {
            node_id,
            endpoint,
            source,
            last_seen: None,
            last_seen_wall: None,
            status: None,
        }
    }
}

pub struct PeerRegistry {
    peers: RwLock<HashMap<String, Peer>>,
    peer_timeout: Duration,
    local_id: String,
}

impl PeerRegistry {
    pub fn new(cfg: &Config) -> Self {
        let mut peers = HashMap::new();
        for seed in &cfg.cluster.peers {
            peers.insert(
                seed.node_id.clone(),
                Peer::new(seed.node_id.clone(), seed.endpoint.clone(), PeerSource::Static),
            );
        }
        peers.entry(cfg.node.id.clone()).or_insert_with(|| {
            Peer::new(cfg.node.id.clone(), cfg.node.endpoint.clone(), PeerSource::Static)
        });
        Self {
            peers: RwLock::new(peers),
            peer_timeout: Duration::from_secs(cfg.cluster.peer_timeout_secs),
            local_id: cfg.node.id.clone(),
        }
    }

    pub fn snapshot(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.read().unwrap().values().cloned().collect();
        peers.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        peers
    }

    pub fn online(&self, peer: &Peer) -> bool {
        peer.last_seen
            .map(|t| t.elapsed() <= self.peer_timeout)
            .unwrap_or(false)
    }

    /// Admin add; always authoritative.
    pub fn add_manual(&self, node_id: String, endpoint: String) {
        info!(node_id, endpoint, "peer added");
        self.peers
            .write()
            .unwrap()
            .insert(node_id.clone(), Peer::new(node_id, endpoint, PeerSource::Static));
    }

    pub fn remove(&self, node_id: &str) -> bool {
        self.peers.write().unwrap().remove(node_id).is_some()
    }

    /// Broadcast announcement; never overrides an admin-entered endpoint.
    pub fn discovered(&self, node_id: String, endpoint: String) {
        if node_id == self.local_id {
            return;
        }
        let mut peers = self.peers.write().unwrap();
        match peers.get_mut(&node_id) {
            Some(peer) if peer.source == PeerSource::Static => {}
            Some(peer) => {
                peer.endpoint = endpoint;
                peer.source = PeerSource::Discovered;
            }
            None => {
                info!(node_id, endpoint, "peer discovered");
                peers.insert(
                    node_id.clone(),
                    Peer::new(node_id, endpoint, PeerSource::Discovered),
                );
            }
        }
    }

    /// A peer called in (sync query); record its origin if we had nothing
    /// better.
    pub fn learn(&self, node_id: String, endpoint: String) {
        if node_id == self.local_id {
            return;
        }
        let mut peers = self.peers.write().unwrap();
        match peers.get_mut(&node_id) {
            Some(peer) => {
                peer.last_seen = Some(Instant::now());
                peer.last_seen_wall = Some(Utc::now());
            }
            None => {
                info!(node_id, endpoint, "peer learned from inbound call");
                let mut peer = Peer::new(node_id.clone(), endpoint, PeerSource::Learned);
                peer.last_seen = Some(Instant::now());
                peer.last_seen_wall = Some(Utc::now());
                peers.insert(node_id, peer);
            }
        }
    }

    pub fn record_probe(&self, node_id: &str, status: Option<NodeStatus>) {
        let mut peers = self.peers.write().unwrap();
        if let Some(peer) = peers.get_mut(node_id) {
            if status.is_some() {
                peer.last_seen = Some(Instant::now());
                peer.last_seen_wall = Some(Utc::now());
                peer.status = status;
            }
        }
    }

    pub fn infos(&self) -> Vec<PeerInfo> {
        self.snapshot()
            .into_iter()
            .map(|p| PeerInfo {
                online: self.online(&p),
                node_id: p.node_id,
                endpoint: p.endpoint,
                source: p.source.as_str().to_string(),
                last_seen: p.last_seen_wall,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerSeed;

    fn registry() -> PeerRegistry {
        let mut cfg = Config::default();
        cfg.node.id = "CAM_C".to_string();
        cfg.cluster.peers = vec![
            PeerSeed {
                node_id: "CAM_L".to_string(),
                endpoint: "http://10.0.0.2:7700".to_string(),
            },
            PeerSeed {
                node_id: "CAM_C".to_string(),
                endpoint: "http://10.0.0.3:7700".to_string(),
            },
        ];
        PeerRegistry::new(&cfg)
    }

    #[test]
    fn seeds_static_peers_and_self() {
        let r = registry();
        let ids: Vec<String> = r.snapshot().into_iter().map(|p| p.node_id).collect();
        assert_eq!(ids, vec!["CAM_C", "CAM_L"]);
    }

    #[test]
    fn discovery_never_overrides_static() {
        let r = registry();
        r.discovered("CAM_L".to_string(), "http://evil:1".to_string());
        let peer = r
            .snapshot()
            .into_iter()
            .find(|p| p.node_id == "CAM_L")
            .unwrap();
        assert_eq!(peer.endpoint, "http://10.0.0.2:7700");

        r.discovered("CAM_R".to_string(), "http://10.0.0.4:7700".to_string());
        let peer = r
            .snapshot()
            .into_iter()
            .find(|p| p.node_id == "CAM_R")
            .unwrap();
        assert_eq!(peer.source, PeerSource::Discovered);
    }

    #[test]
    fn learn_records_liveness() {
        let r = registry();
        r.learn("CAM_R".to_string(), "http://10.0.0.4:7700".to_string());
        let peer = r
            .snapshot()
            .into_iter()
            .find(|p| p.node_id == "CAM_R")
            .unwrap();
        assert!(r.online(&peer));
        assert_eq!(peer.source, PeerSource::Learned);
    }

    #[test]
    fn offline_until_probed() {
        let r = registry();
        let peer = r
            .snapshot()
            .into_iter()
            .find(|p| p.node_id == "CAM_L")
            .unwrap();
        assert!(!r.online(&peer));
    }
}
