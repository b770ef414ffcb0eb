//! Background loops: peer status probing and LAN broadcast discovery.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use futures::future::join_all;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use api::response::NodeStatus;

use crate::registry::Announce;
use crate::AppState;

pub async fn probe_peers(state: AppState) {
    let interval = Duration::from_millis(state.config.cluster.probe_interval_ms);
    loop {
        tokio::time::sleep(interval).await;
        do_probe(&state).await;
    }
}

async fn do_probe(state: &AppState) {
    let peers = state.registry.snapshot();
    let results = join_all(peers.into_iter().map(|peer| {
        let client = state.probe_client.clone();
        async move {
            let url = format!("{}{}", peer.endpoint, api::path::STATUS);
            let status = match client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    resp.json::<NodeStatus>().await.ok()
                }
                Ok(resp) => {
                    debug!(node_id = peer.node_id, status = %resp.status(), "probe rejected");
                    None
                }
                Err(e) => {
                    debug!(node_id = peer.node_id, "probe failed: {}", e);
                    None
                }
            };
            (peer.node_id, status)
        }
    }))
    .await;
    for (node_id, status) in results {
        state.registry.record_probe(&node_id, status);
    }
}

pub async fn discovery_announce(state: AppState) {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => {
            warn!("discovery announce socket failed: {}", e);
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!("discovery broadcast flag failed: {}", e);
        return;
    }
    let target = SocketAddr::V4(SocketAddrV4::new(
        Ipv4Addr::BROADCAST,
        state.config.discovery.port,
    ));
    let payload = serde_json::to_vec(&Announce {
        node_id: state.config.node.id.clone(),
        endpoint: state.config.node.endpoint.clone(),
    })
    .expect("announce serializes");
    let interval = Duration::from_secs(state.config.discovery.announce_interval_secs);
    loop {
        if let Err(e) = socket.send_to(&payload, target).await {
            debug!("discovery announce failed: {}", e);
        }
        tokio::time::sleep(interval).await;
    }
}

pub async fn discovery_listen(state: AppState) {
    let socket = match UdpSocket::bind(("0.0.0.0", state.config.discovery.port)).await {
        Ok(s) => s,
        Err(e) => {
            warn!("discovery listen socket failed: {}", e);
            return;
        }
    };
    let mut buf = [0u8; 1024];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => match serde_json::from_slice::<Announce>(&buf[..len]) {
                Ok(announce) => {
                    debug!(node_id = announce.node_id, %from, "discovery announce");
                    state.registry.discovered(announce.node_id, announce.endpoint);
                }
                Err(e) => debug!("discarding malformed announce from {}: {}", from, e),
            },
            Err(e) => {
                warn!("discovery recv failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
