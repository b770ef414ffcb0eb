use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::net::TcpListener;

use api::response::{
    SessionDetail, SessionStatus, UploadChunkResponse, UploadConfirmResponse,
    UploadFinalizeResponse, UploadInitResponse,
};

async fn spawn_server(root: &Path) -> String {
    let mut cfg = ingestd::config::Config::default();
    cfg.storage.root = root.to_path_buf();
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(ingestd::serve(cfg, listener, std::future::pending()));
    format!("http://{}", addr)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn file_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn manifest_json(
    session_id: &str,
    node_id: &str,
    checksum: &str,
    size: usize,
    expected: &[&str],
) -> serde_json::Value {
    serde_json::json!({
        "version": "1",
        "recording": {
            "id": format!("{}_{}", session_id, node_id),
            "session_id": session_id,
            "node_id": node_id,
            "position": "center",
        },
        "file": {
            "name": format!("{}_{}.mp4", session_id, node_id),
            "size_bytes": size,
            "container": "mp4",
            "codec": "h264",
        },
        "video": {"width": 3840, "height": 2160, "fps": 30, "bitrate_mbps": 30, "duration_sec": 1.0},
        "timing": {
            "start_time": "2024-03-15T14:00:00Z",
            "end_time": "2024-03-15T14:00:01Z",
            "sync_ok": true,
            "sync_offset_ms": 0.2,
        },
        "checksum": {"algorithm": "sha256", "value": checksum},
        "device": {"hostname": "test", "endpoint": "http://127.0.0.1:1", "software_version": "0.1.0"},
        "quality": {"dropped_frames": 0, "temperature_avg_c": 40.0, "temperature_max_c": 45.0},
        "expected_cameras": expected,
    })
}

async fn init(
    client: &reqwest::Client,
    base: &str,
    session_id: &str,
    node_id: &str,
    file: &[u8],
    chunk_size: u64,
    checksum: &str,
) -> UploadInitResponse {
    client
        .post(format!("{}{}", base, api::path::UPLOAD_INIT))
        .json(&serde_json::json!({
            "node_id": node_id,
            "session_id": session_id,
            "recording_id": format!("{}_{}", session_id, node_id),
            "file_size": file.len(),
            "chunk_size": chunk_size,
            "checksum": checksum,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn send_chunk(
    client: &reqwest::Client,
    base: &str,
    upload_id: &str,
    index: u32,
    data: Vec<u8>,
) -> reqwest::Response {
    let form = reqwest::multipart::Form::new()
        .text("upload_id", upload_id.to_string())
        .text("chunk_index", index.to_string())
        .text("chunk_hash", sha256_hex(&data))
        .part("chunk", reqwest::multipart::Part::bytes(data).file_name("chunk"));
    client
        .post(format!("{}{}", base, api::path::UPLOAD_CHUNK))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

async fn send_chunks(
    client: &reqwest::Client,
    base: &str,
    upload_id: &str,
    file: &[u8],
    chunk_size: usize,
    indices: impl Iterator<Item = u32>,
) {
    for index in indices {
        let start = index as usize * chunk_size;
        let end = (start + chunk_size).min(file.len());
        let resp = send_chunk(client, base, upload_id, index, file[start..end].to_vec()).await;
        assert!(resp.status().is_success(), "chunk {} rejected", index);
        let body: UploadChunkResponse = resp.json().await.unwrap();
        assert!(body.ok);
    }
}

async fn finalize(
    client: &reqwest::Client,
    base: &str,
    upload_id: &str,
    total_chunks: u32,
) -> UploadFinalizeResponse {
    client
        .post(format!("{}{}", base, api::path::UPLOAD_FINALIZE))
        .json(&serde_json::json!({"upload_id": upload_id, "total_chunks": total_chunks}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn confirm(
    client: &reqwest::Client,
    base: &str,
    session_id: &str,
    node_id: &str,
) -> UploadConfirmResponse {
    client
        .post(format!("{}{}", base, api::path::UPLOAD_CONFIRM))
        .json(&serde_json::json!({"session_id": session_id, "node_id": node_id}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn put_manifest(
    client: &reqwest::Client,
    base: &str,
    session_id: &str,
    manifest: &serde_json::Value,
) {
    let resp = client
        .post(format!("{}{}", base, api::path::session_manifest(session_id)))
        .json(manifest)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
}

async fn session_detail(client: &reqwest::Client, base: &str, session_id: &str) -> SessionDetail {
    client
        .get(format!("{}{}", base, api::path::session(session_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn happy_path_publishes_session() {
    let root = tempfile::tempdir().unwrap();
    let base = spawn_server(root.path()).await;
    let client = reqwest::Client::new();

    let session_id = "GAME_20240315_140000";
    let file = file_bytes(100);
    let checksum = sha256_hex(&file);

    let init_resp = init(&client, &base, session_id, "CAM_C", &file, 32, &checksum).await;
    assert!(init_resp.received_chunks.is_empty());

    put_manifest(
        &client,
        &base,
        session_id,
        &manifest_json(session_id, "CAM_C", &checksum, file.len(), &["CAM_C"]),
    )
    .await;
    send_chunks(&client, &base, &init_resp.upload_id, &file, 32, 0..4).await;

    let fin = finalize(&client, &base, &init_resp.upload_id, 4).await;
    assert_eq!(fin.checksum_sha256, checksum);
    assert_eq!(fin.size_bytes, 100);

    // finalize is idempotent
    let again = finalize(&client, &base, &init_resp.upload_id, 4).await;
    assert_eq!(again.checksum_sha256, checksum);

    let conf = confirm(&client, &base, session_id, "CAM_C").await;
    assert_eq!(conf.checksum_sha256, checksum);

    let detail = session_detail(&client, &base, session_id).await;
    assert_eq!(detail.status, SessionStatus::Published);
    assert_eq!(detail.cameras.len(), 1);
    assert!(detail.cameras[0].confirmed);
    assert_eq!(
        detail.cameras[0].checksum_sha256.as_deref(),
        Some(checksum.as_str())
    );

    // published layout: recording + manifest + status document, staging gone
    let published = root.path().join("sessions").join(session_id);
    let stored = std::fs::read(published.join("CAM_C").join("recording.mp4")).unwrap();
    assert_eq!(stored, file);
    assert!(published.join("CAM_C").join("manifest.json").exists());
    assert!(published.join("session.json").exists());
    assert!(!root.path().join("staging").join(session_id).exists());

    // confirm stays idempotent after publication
    let conf = confirm(&client, &base, session_id, "CAM_C").await;
    assert_eq!(conf.checksum_sha256, checksum);
}

#[tokio::test]
async fn interrupted_upload_resumes_with_received_chunks() {
    let root = tempfile::tempdir().unwrap();
    let base = spawn_server(root.path()).await;
    let client = reqwest::Client::new();

    let session_id = "GAME_20240315_150000";
    let file = file_bytes(1000);
    let checksum = sha256_hex(&file);
    let chunk_size = 100u64;

    let first = init(&client, &base, session_id, "CAM_L", &file, chunk_size, &checksum).await;
    send_chunks(&client, &base, &first.upload_id, &file, 100, 0..7).await;

    // "reconnect": a fresh init reports exactly the persisted indices and
    // the same upload id
    let second = init(&client, &base, session_id, "CAM_L", &file, chunk_size, &checksum).await;
    assert_eq!(second.upload_id, first.upload_id);
    assert_eq!(second.received_chunks, (0..7).collect::<Vec<u32>>());

    put_manifest(
        &client,
        &base,
        session_id,
        &manifest_json(session_id, "CAM_L", &checksum, file.len(), &["CAM_L"]),
    )
    .await;
    send_chunks(&client, &base, &second.upload_id, &file, 100, 7..10).await;
    let fin = finalize(&client, &base, &second.upload_id, 10).await;
    assert_eq!(fin.checksum_sha256, checksum);

    confirm(&client, &base, session_id, "CAM_L").await;
    let detail = session_detail(&client, &base, session_id).await;
    assert_eq!(detail.status, SessionStatus::Published);
}

#[tokio::test]
async fn checksum_mismatch_discards_partial_for_clean_retry() {
    let root = tempfile::tempdir().unwrap();
    let base = spawn_server(root.path()).await;
    let client = reqwest::Client::new();

    let session_id = "GAME_20240315_160000";
    let file = file_bytes(64);
    let good = sha256_hex(&file);
    let bad = "00".repeat(32);

    let first = init(&client, &base, session_id, "CAM_R", &file, 32, &bad).await;
    put_manifest(
        &client,
        &base,
        session_id,
        &manifest_json(session_id, "CAM_R", &bad, file.len(), &["CAM_R"]),
    )
    .await;
    send_chunks(&client, &base, &first.upload_id, &file, 32, 0..2).await;

    // server computes the real hash, disagrees with the declared one, and
    // garbage-collects its partial
    let fin = finalize(&client, &base, &first.upload_id, 2).await;
    assert_eq!(fin.checksum_sha256, good);
    assert_ne!(fin.checksum_sha256, bad);

    // confirm must fail: nothing was finalized successfully
    let resp = client
        .post(format!("{}{}", base, api::path::UPLOAD_CONFIRM))
        .json(&serde_json::json!({"session_id": session_id, "node_id": "CAM_R"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), http_status(409));

    // fresh init starts from scratch with a new upload id
    let second = init(&client, &base, session_id, "CAM_R", &file, 32, &good).await;
    assert_ne!(second.upload_id, first.upload_id);
    assert!(second.received_chunks.is_empty());

    send_chunks(&client, &base, &second.upload_id, &file, 32, 0..2).await;
    let fin = finalize(&client, &base, &second.upload_id, 2).await;
    assert_eq!(fin.checksum_sha256, good);
    confirm(&client, &base, session_id, "CAM_R").await;
    let detail = session_detail(&client, &base, session_id).await;
    assert_eq!(detail.status, SessionStatus::Published);
}

#[tokio::test]
async fn publication_waits_for_every_expected_camera() {
    let root = tempfile::tempdir().unwrap();
    let base = spawn_server(root.path()).await;
    let client = reqwest::Client::new();

    let session_id = "GAME_20240315_170000";
    let expected = ["CAM_C", "CAM_L"];

    for node_id in ["CAM_C"] {
        let file = file_bytes(50);
        let checksum = sha256_hex(&file);
        let up = init(&client, &base, session_id, node_id, &file, 50, &checksum).await;
        put_manifest(
            &client,
            &base,
            session_id,
            &manifest_json(session_id, node_id, &checksum, file.len(), &expected),
        )
        .await;
        send_chunks(&client, &base, &up.upload_id, &file, 50, 0..1).await;
        finalize(&client, &base, &up.upload_id, 1).await;
        confirm(&client, &base, session_id, node_id).await;
    }

    // one of two cameras confirmed: still staged, invisible under sessions/
    let detail = session_detail(&client, &base, session_id).await;
    assert_eq!(detail.status, SessionStatus::Open);
    assert!(!root.path().join("sessions").join(session_id).exists());
    assert!(root.path().join("staging").join(session_id).exists());

    let file = file_bytes(80);
    let checksum = sha256_hex(&file);
    let up = init(&client, &base, session_id, "CAM_L", &file, 40, &checksum).await;
    put_manifest(
        &client,
        &base,
        session_id,
        &manifest_json(session_id, "CAM_L", &checksum, file.len(), &expected),
    )
    .await;
    send_chunks(&client, &base, &up.upload_id, &file, 40, 0..2).await;
    finalize(&client, &base, &up.upload_id, 2).await;
    confirm(&client, &base, session_id, "CAM_L").await;

    let detail = session_detail(&client, &base, session_id).await;
    assert_eq!(detail.status, SessionStatus::Published);
    let published = root.path().join("sessions").join(session_id);
    assert!(published.join("CAM_C").join("recording.mp4").exists());
    assert!(published.join("CAM_L").join("recording.mp4").exists());
}

#[tokio::test]
async fn duplicate_chunks_are_idempotent_but_conflicting_content_is_not() {
    let root = tempfile::tempdir().unwrap();
    let base = spawn_server(root.path()).await;
    let client = reqwest::Client::new();

    let session_id = "GAME_20240315_180000";
    let file = file_bytes(40);
    let checksum = sha256_hex(&file);
    let up = init(&client, &base, session_id, "CAM_C", &file, 20, &checksum).await;

    let resp = send_chunk(&client, &base, &up.upload_id, 0, file[..20].to_vec()).await;
    assert!(resp.status().is_success());
    // same bytes again: accepted as a no-op
    let resp = send_chunk(&client, &base, &up.upload_id, 0, file[..20].to_vec()).await;
    assert!(resp.status().is_success());
    // same index, different bytes: rejected
    let resp = send_chunk(&client, &base, &up.upload_id, 0, vec![0xFF; 20]).await;
    assert_eq!(resp.status(), http_status(409));
    // out-of-range index: rejected
    let resp = send_chunk(&client, &base, &up.upload_id, 9, file[..20].to_vec()).await;
    assert_eq!(resp.status(), http_status(400));
}

#[tokio::test]
async fn rejects_manifests_with_unknown_major_version() {
    let root = tempfile::tempdir().unwrap();
    let base = spawn_server(root.path()).await;
    let client = reqwest::Client::new();

    let session_id = "GAME_20240315_190000";
    let mut manifest = manifest_json(session_id, "CAM_C", &"ab".repeat(32), 10, &["CAM_C"]);
    manifest["version"] = serde_json::json!("2");
    let resp = client
        .post(format!("{}{}", base, api::path::session_manifest(session_id)))
        .json(&manifest)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), http_status(400));
}

fn http_status(code: u16) -> reqwest::StatusCode {
    reqwest::StatusCode::from_u16(code).unwrap()
}
