//! End to end: a node records with the simulated pipeline, the offload
//! worker pushes the artifact to a live ingest server, and the session
//! publishes once the hash is confirmed.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;

use api::response::{
    OffloadState, OffloadStatusReport, RecordingSummary, SessionDetail, SessionStatus,
};

mod common;
use common::{node_config, pick_ports, spawn_node, NodeSpec};

async fn spawn_ingest(root: &std::path::Path) -> String {
    let mut cfg = ingestd::config::Config::default();
    cfg.storage.root = root.to_path_buf();
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(ingestd::serve(cfg, listener, std::future::pending()));
    format!("http://{}", addr)
}

#[tokio::test]
async fn recording_is_uploaded_verified_and_published() {
    let node_root = tempfile::tempdir().unwrap();
    let ingest_root = tempfile::tempdir().unwrap();
    let ingest = spawn_ingest(ingest_root.path()).await;

    let ports = pick_ports(1);
    let center = NodeSpec {
        id: "CAM_C",
        port: ports[0],
    };
    let all = [center];
    let center = &all[0];
    let mut cfg = node_config(center, center, &all, node_root.path());
    cfg.offload.auto_upload = true;
    cfg.offload.server_url = ingest.clone();
    cfg.offload.chunk_size = 1024;
    spawn_node(cfg).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::new();
    let session_id = "GAME_20240601_090000";

    // record a short clip through the node API
    let resp = client
        .post(format!("{}{}", center.endpoint(), api::path::ARM))
        .json(&serde_json::json!({ "session_id": session_id }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "arm failed");
    let resp = client
        .post(format!("{}{}", center.endpoint(), api::path::START))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success(), "start failed");

    tokio::time::sleep(Duration::from_millis(300)).await;

    let summary: RecordingSummary = client
        .post(format!("{}{}", center.endpoint(), api::path::STOP))
        .json(&serde_json::json!({}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(summary.size_bytes > 0);

    // the offload worker picks the recording up on its own
    let mut confirmed = false;
    for _ in 0..100 {
        let report: OffloadStatusReport = client
            .get(format!("{}{}", center.endpoint(), api::path::OFFLOAD_STATUS))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if let Some(job) = report
            .jobs
            .iter()
            .find(|j| j.recording_id == summary.recording_id)
        {
            match job.state {
                OffloadState::Confirmed => {
                    confirmed = true;
                    break;
                }
                OffloadState::Failed => panic!("offload failed: {:?}", job.error),
                _ => {}
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(confirmed, "offload never confirmed");

    // the single expected camera confirmed, so the session is published
    let detail: SessionDetail = client
        .get(format!("{}{}", ingest, api::path::session(session_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(detail.status, SessionStatus::Published);
    assert_eq!(detail.expected_cameras, vec!["CAM_C".to_string()]);
    assert!(detail.cameras[0].confirmed);
    assert_eq!(
        detail.cameras[0].checksum_sha256.as_deref(),
        Some(summary.checksum_sha256.as_str())
    );
    assert_eq!(detail.cameras[0].size_bytes, Some(summary.size_bytes));

    // byte-for-byte identical artifact on the ingest side
    let published = ingest_root
        .path()
        .join("sessions")
        .join(session_id)
        .join("CAM_C")
        .join("recording.mp4");
    let stored = std::fs::read(&published).unwrap();
    assert_eq!(stored.len() as u64, summary.size_bytes);
    let local = std::fs::read(&summary.file_path).unwrap();
    assert_eq!(stored, local);
}
