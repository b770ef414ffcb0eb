//! Upload bookkeeping and the content layout:
//!
//! ```text
//! {root}/staging/{session_id}/{node_id}/chunks/chunk_000000
//! {root}/staging/{session_id}/{node_id}/recording.{ext}
//! {root}/staging/{session_id}/{node_id}/manifest.json
//! {root}/sessions/{session_id}/...          (after publication)
//! ```
//!
//! `init` is idempotent per recording id: while an upload is open, a repeat
//! init returns the same upload id plus the chunk indices already on disk,
//! which is also how a client resumes after an interruption. Publication is
//! a whole-directory rename from `staging/` to `sessions/`, so a reader of
//! `sessions/` never observes a session missing a confirmed camera.

use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};

use api::manifest::Manifest;
use api::request::{UploadConfirm, UploadFinalize, UploadInit};
use api::response::{
    IngestHealth, SessionCamera, SessionDetail, SessionListEntry, SessionStatus,
    UploadChunkResponse, UploadConfirmResponse, UploadFinalizeResponse, UploadInitResponse,
};
use api::session;

use crate::config::StorageConfig;
use crate::error::AppError;
use crate::result::Result;

pub struct IngestStore {
    cfg: StorageConfig,
    uploads: Mutex<Uploads>,
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

#[derive(Default)]
struct Uploads {
    by_id: HashMap<String, Arc<Mutex<UploadSession>>>,
    by_recording: HashMap<String, String>,
}

struct UploadSession {
    upload_id: String,
    recording_id: String,
    session_id: String,
    node_id: String,
    file_size: u64,
    chunk_size: u64,
    checksum: String,
    total_chunks: u32,
    chunk_dir: PathBuf,
    received: BTreeSet<u32>,
    finalized: Option<(String, u64)>,
    created_at: Instant,
}

impl UploadSession {
    fn chunk_len(&self, index: u32) -> u64 {
        let offset = index as u64 * self.chunk_size;
        self.chunk_size.min(self.file_size.saturating_sub(offset))
    }

    fn chunk_path(&self, index: u32) -> PathBuf {
        self.chunk_dir.join(format!("chunk_{:06}", index))
    }
}

struct SessionRecord {
    session_id: String,
    created_at: DateTime<Utc>,
    first_upload_at: Instant,
    expected: Vec<String>,
    cameras: HashMap<String, CameraRecord>,
    status: SessionStatus,
    published_at: Option<DateTime<Utc>>,
}

impl SessionRecord {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            first_upload_at: Instant::now(),
            expected: vec![],
            cameras: HashMap::new(),
            status: SessionStatus::Open,
            published_at: None,
        }
    }

    fn complete(&self) -> bool {
        !self.expected.is_empty()
            && self.expected.iter().all(|node_id| {
                self.cameras
                    .get(node_id)
                    .map(|c| c.confirmed && c.has_manifest)
                    .unwrap_or(false)
            })
    }

    fn detail(&self) -> SessionDetail {
        let mut cameras: Vec<SessionCamera> = self
            .cameras
            .iter()
            .map(|(node_id, c)| SessionCamera {
                node_id: node_id.clone(),
                confirmed: c.confirmed,
                has_manifest: c.has_manifest,
                size_bytes: c.finalized.as_ref().map(|(_, size)| *size),
                checksum_sha256: c.finalized.as_ref().map(|(hash, _)| hash.clone()),
            })
            .collect();
        cameras.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        SessionDetail {
            session_id: self.session_id.clone(),
            status: self.status,
            created_at: self.created_at,
            published_at: self.published_at,
            expected_cameras: self.expected.clone(),
            cameras,
        }
    }
}

#[derive(Default, Clone)]
struct CameraRecord {
    has_manifest: bool,
    container: Option<String>,
    finalized: Option<(String, u64)>,
    confirmed: bool,
}

impl IngestStore {
    pub fn new(cfg: StorageConfig) -> Self {
        std::fs::create_dir_all(cfg.root.join("staging")).expect("create staging dir");
        std::fs::create_dir_all(cfg.root.join("sessions")).expect("create sessions dir");
        Self {
            cfg,
            uploads: Mutex::new(Uploads::default()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn staging_dir(&self, session_id: &str, node_id: &str) -> PathBuf {
        self.cfg.root.join("staging").join(session_id).join(node_id)
    }

    pub async fn init_upload(&self, req: UploadInit) -> Result<UploadInitResponse> {
        if !session::is_valid(&req.session_id) {
            return Err(AppError::bad_request("invalid session id"));
        }
        if req.node_id.is_empty() || req.chunk_size == 0 || req.checksum.is_empty() {
            return Err(AppError::bad_request(
                "node_id, chunk_size and checksum are required",
            ));
        }
        if req.recording_id != session::recording_id(&req.session_id, &req.node_id) {
            return Err(AppError::bad_request(
                "recording_id must be {session_id}_{node_id}",
            ));
        }

        // never hold the registry lock while waiting on a session lock:
        // resolve the open-upload case first, then insert with a re-check
        let existing = {
            let uploads = self.uploads.lock().await;
            uploads
                .by_recording
                .get(&req.recording_id)
                .and_then(|upload_id| uploads.by_id.get(upload_id).cloned())
        };
        if let Some(existing) = existing {
            // at most one open upload per recording: a concurrent or
            // retried init sees the same upload and what already landed
            let session = existing.lock().await;
            return Ok(UploadInitResponse {
                upload_id: session.upload_id.clone(),
                received_chunks: session.received.iter().copied().collect(),
            });
        }

        let chunk_dir = self.staging_dir(&req.session_id, &req.node_id).join("chunks");
        tokio::fs::create_dir_all(&chunk_dir).await?;

        let mut session = UploadSession {
            upload_id: uuid::Uuid::new_v4().to_string(),
            recording_id: req.recording_id.clone(),
            session_id: req.session_id.clone(),
            node_id: req.node_id.clone(),
            file_size: req.file_size,
            chunk_size: req.chunk_size,
            checksum: req.checksum,
            total_chunks: req.file_size.div_ceil(req.chunk_size) as u32,
            chunk_dir,
            received: BTreeSet::new(),
            finalized: None,
            created_at: Instant::now(),
        };
        // chunks left behind by an interrupted upload survive restarts
        session.received = scan_chunks(&session).await?;
        let received_chunks: Vec<u32> = session.received.iter().copied().collect();
        let upload_id = session.upload_id.clone();

        {
            let mut uploads = self.uploads.lock().await;
            if let Some(raced) = uploads
                .by_recording
                .get(&req.recording_id)
                .and_then(|id| uploads.by_id.get(id).cloned())
            {
                // a concurrent init won the race; hand back its upload
                drop(uploads);
                let session = raced.lock().await;
                return Ok(UploadInitResponse {
                    upload_id: session.upload_id.clone(),
                    received_chunks: session.received.iter().copied().collect(),
                });
            }
            uploads
                .by_recording
                .insert(req.recording_id.clone(), upload_id.clone());
            uploads
                .by_id
                .insert(upload_id.clone(), Arc::new(Mutex::new(session)));
        }
        info!(
            recording_id = req.recording_id,
            upload_id,
            resumed = received_chunks.len(),
            "upload initialized"
        );

        let mut sessions = self.sessions.lock().await;
        sessions
            .entry(req.session_id.clone())
            .or_insert_with(|| SessionRecord::new(req.session_id.clone()));

        Ok(UploadInitResponse {
            upload_id,
            received_chunks,
        })
    }

    pub async fn write_chunk(
        &self,
        upload_id: &str,
        chunk_index: u32,
        chunk_hash: Option<String>,
        data: Vec<u8>,
    ) -> Result<UploadChunkResponse> {
        let session = self.upload(upload_id).await?;
        let mut session = session.lock().await;
        if chunk_index >= session.total_chunks {
            return Err(AppError::bad_request(format!(
                "chunk index {} exceeds total {}",
                chunk_index, session.total_chunks
            )));
        }
        let expected_len = session.chunk_len(chunk_index);
        if data.len() as u64 != expected_len {
            return Err(AppError::bad_request(format!(
                "chunk {} is {} bytes, expected {}",
                chunk_index,
                data.len(),
                expected_len
            )));
        }
        if let Some(hash) = &chunk_hash {
            if *hash != sha256_hex(&data) {
                return Err(AppError::bad_request(format!(
                    "chunk {} hash mismatch",
                    chunk_index
                )));
            }
        }

        if session.received.contains(&chunk_index) {
            // replayed chunk: a no-op as long as the bytes agree
            let existing = tokio::fs::read(session.chunk_path(chunk_index)).await?;
            let same = match &chunk_hash {
                Some(hash) => *hash == sha256_hex(&existing),
                None => existing.len() == data.len(),
            };
            if !same {
                return Err(AppError::conflict(format!(
                    "chunk {} already persisted with different content",
                    chunk_index
                )));
            }
            return Ok(UploadChunkResponse {
                ok: true,
                chunk_index,
            });
        }

        tokio::fs::write(session.chunk_path(chunk_index), &data).await?;
        session.received.insert(chunk_index);
        Ok(UploadChunkResponse {
            ok: true,
            chunk_index,
        })
    }

    pub async fn finalize(&self, req: UploadFinalize) -> Result<UploadFinalizeResponse> {
        let session = self.upload(&req.upload_id).await?;
        let mut session = session.lock().await;
        if let Some((checksum, size)) = &session.finalized {
            return Ok(UploadFinalizeResponse {
                checksum_sha256: checksum.clone(),
                size_bytes: *size,
            });
        }
        if req.total_chunks != session.total_chunks {
            return Err(AppError::bad_request(format!(
                "total_chunks {} does not match init-declared {}",
                req.total_chunks, session.total_chunks
            )));
        }
        let missing: Vec<u32> = (0..session.total_chunks)
            .filter(|i| !session.received.contains(i))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::bad_request(format!(
                "missing chunks: {:?}",
                missing
            )));
        }

        let container = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(&session.session_id)
                .and_then(|r| r.cameras.get(&session.node_id))
                .and_then(|c| c.container.clone())
                .unwrap_or_else(|| "mp4".to_string())
        };
        let out_path = self
            .staging_dir(&session.session_id, &session.node_id)
            .join(format!("recording.{}", container));

        let (checksum, size_bytes) =
            assemble(session.chunk_dir.clone(), session.total_chunks, out_path.clone()).await?;

        if checksum != session.checksum {
            // drop the partial entirely; the client restarts from init
            warn!(
                recording_id = session.recording_id,
                server = checksum,
                declared = session.checksum,
                "finalize checksum mismatch, discarding upload"
            );
            let _ = tokio::fs::remove_file(&out_path).await;
            let _ = tokio::fs::remove_dir_all(&session.chunk_dir).await;
            let upload_id = session.upload_id.clone();
            let recording_id = session.recording_id.clone();
            drop(session);
            let mut uploads = self.uploads.lock().await;
            uploads.by_id.remove(&upload_id);
            uploads.by_recording.remove(&recording_id);
            return Ok(UploadFinalizeResponse {
                checksum_sha256: checksum,
                size_bytes,
            });
        }

        let _ = tokio::fs::remove_dir_all(&session.chunk_dir).await;
        session.finalized = Some((checksum.clone(), size_bytes));
        info!(
            recording_id = session.recording_id,
            size_bytes, "upload finalized"
        );

        let mut sessions = self.sessions.lock().await;
        let record = sessions
            .entry(session.session_id.clone())
            .or_insert_with(|| SessionRecord::new(session.session_id.clone()));
        record
            .cameras
            .entry(session.node_id.clone())
            .or_default()
            .finalized = Some((checksum.clone(), size_bytes));

        Ok(UploadFinalizeResponse {
            checksum_sha256: checksum,
            size_bytes,
        })
    }

    /// Idempotent: repeated confirms return the same checksum. When the
    /// last expected camera confirms, the session directory is atomically
    /// renamed into `sessions/`.
    pub async fn confirm(&self, req: UploadConfirm) -> Result<UploadConfirmResponse> {
        let mut sessions = self.sessions.lock().await;
        let record = sessions
            .get_mut(&req.session_id)
            .ok_or_else(|| AppError::not_found(format!("session {}", req.session_id)))?;
        let camera = record
            .cameras
            .get_mut(&req.node_id)
            .ok_or_else(|| AppError::not_found(format!("no upload from {}", req.node_id)))?;
        let (checksum, _) = camera
            .finalized
            .clone()
            .ok_or_else(|| AppError::conflict("upload not finalized"))?;
        camera.confirmed = true;

        if record.status == SessionStatus::Open && record.complete() {
            self.publish(record, SessionStatus::Published)?;
        }
        Ok(UploadConfirmResponse {
            checksum_sha256: checksum,
        })
    }

    pub async fn put_manifest(&self, session_id: &str, value: serde_json::Value) -> Result<()> {
        let bytes = serde_json::to_vec(&value)?;
        let manifest = Manifest::from_json(&bytes).map_err(AppError::bad_request)?;
        if manifest.recording.session_id != session_id {
            return Err(AppError::bad_request(format!(
                "manifest is for session {}, not {}",
                manifest.recording.session_id, session_id
            )));
        }
        let node_id = manifest.recording.node_id.clone();

        let mut sessions = self.sessions.lock().await;
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord::new(session_id.to_string()));

        let dir = if record.status == SessionStatus::Open {
            self.staging_dir(session_id, &node_id)
        } else {
            self.cfg.root.join("sessions").join(session_id).join(&node_id)
        };
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            dir.join("manifest.json"),
            serde_json::to_vec_pretty(&value)?,
        )?;

        if record.expected.is_empty() {
            // the first manifest to arrive fixes the participant set
            let mut expected = manifest.expected_cameras.clone();
            expected.sort();
            expected.dedup();
            record.expected = expected;
            info!(session_id, expected = ?record.expected, "participants declared");
        }
        let camera = record.cameras.entry(node_id).or_default();
        camera.has_manifest = true;
        camera.container = Some(manifest.file.container.clone());

        if record.status == SessionStatus::Open && record.complete() {
            self.publish(record, SessionStatus::Published)?;
        }
        Ok(())
    }

    /// Same-filesystem rename of the whole session directory. The status
    /// document is written inside the staging tree first so it travels with
    /// the rename.
    fn publish(&self, record: &mut SessionRecord, status: SessionStatus) -> Result<()> {
        let staging = self.cfg.root.join("staging").join(&record.session_id);
        let target = self.cfg.root.join("sessions").join(&record.session_id);
        record.status = status;
        record.published_at = Some(Utc::now());
        std::fs::write(
            staging.join("session.json"),
            serde_json::to_vec_pretty(&record.detail())?,
        )?;
        std::fs::rename(&staging, &target)?;
        info!(
            session_id = record.session_id,
            status = ?status,
            "session published"
        );
        Ok(())
    }

    async fn upload(&self, upload_id: &str) -> Result<Arc<Mutex<UploadSession>>> {
        self.uploads
            .lock()
            .await
            .by_id
            .get(upload_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("upload {}", upload_id)))
    }

    pub async fn session_detail(&self, session_id: &str) -> Result<SessionDetail> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .map(|r| r.detail())
            .ok_or_else(|| AppError::not_found(format!("session {}", session_id)))
    }

    pub async fn list_sessions(&self) -> Vec<SessionListEntry> {
        let sessions = self.sessions.lock().await;
        let mut out: Vec<SessionListEntry> = sessions
            .values()
            .map(|r| SessionListEntry {
                session_id: r.session_id.clone(),
                status: r.status,
                created_at: r.created_at,
                recordings_count: r.cameras.len(),
            })
            .collect();
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        out
    }

    pub async fn health(&self) -> IngestHealth {
        let active_uploads = {
            let uploads = self.uploads.lock().await;
            let mut open = 0;
            for session in uploads.by_id.values() {
                if session.lock().await.finalized.is_none() {
                    open += 1;
                }
            }
            open
        };
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let target = self
            .cfg
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.cfg.root.clone());
        let storage_free_bytes = disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().components().count())
            .map(|d| d.available_space())
            .unwrap_or(0);
        IngestHealth {
            storage_free_bytes,
            active_uploads,
        }
    }

    /// Periodic housekeeping: publish overdue sessions as PARTIAL, drop
    /// stale upload sessions and their chunks.
    pub async fn tick(self: Arc<Self>) {
        let interval = Duration::from_secs(self.cfg.tick_interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            self.sweep().await;
        }
    }

    async fn sweep(&self) {
        let complete_timeout = Duration::from_secs(self.cfg.session_complete_timeout_secs);
        {
            let mut sessions = self.sessions.lock().await;
            let overdue: Vec<String> = sessions
                .values()
                .filter(|r| {
                    r.status == SessionStatus::Open
                        && r.first_upload_at.elapsed() > complete_timeout
                        && r.cameras.values().any(|c| c.confirmed)
                })
                .map(|r| r.session_id.clone())
                .collect();
            for session_id in overdue {
                if let Some(record) = sessions.get_mut(&session_id) {
                    warn!(session_id, "completion timeout, publishing partial session");
                    if let Err(e) = self.publish(record, SessionStatus::Partial) {
                        warn!(session_id, "partial publication failed: {:?}", e);
                    }
                }
            }
        }

        let stale_timeout = Duration::from_secs(self.cfg.upload_session_timeout_secs);
        let mut uploads = self.uploads.lock().await;
        let mut stale = vec![];
        for (upload_id, session) in uploads.by_id.iter() {
            let session = session.lock().await;
            if session.finalized.is_none() && session.created_at.elapsed() > stale_timeout {
                stale.push((
                    upload_id.clone(),
                    session.recording_id.clone(),
                    session.chunk_dir.clone(),
                ));
            }
        }
        for (upload_id, recording_id, chunk_dir) in stale {
            warn!(upload_id, recording_id, "garbage-collecting stale upload");
            let _ = tokio::fs::remove_dir_all(&chunk_dir).await;
            uploads.by_id.remove(&upload_id);
            uploads.by_recording.remove(&recording_id);
        }
    }
}

async fn scan_chunks(session: &UploadSession) -> Result<BTreeSet<u32>> {
    let mut received = BTreeSet::new();
    let mut entries = match tokio::fs::read_dir(&session.chunk_dir).await {
        Ok(rd) => rd,
        Err(_) => return Ok(received),
    };
    while let Some(entry) = entries.next_entry().await.map_err(anyhow::Error::from)? {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(index) = name
            .strip_prefix("chunk_")
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        if index >= session.total_chunks {
            continue;
        }
        let len = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
        if len == session.chunk_len(index) {
            received.insert(index);
        }
    }
    Ok(received)
}

/// Concatenate chunk files into the final recording, hashing as we go.
async fn assemble(
    chunk_dir: PathBuf,
    total_chunks: u32,
    out_path: PathBuf,
) -> Result<(String, u64)> {
    let result = tokio::task::spawn_blocking(move || -> anyhow::Result<(String, u64)> {
        let mut out = std::fs::File::create(&out_path)?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; 1024 * 1024];
        for index in 0..total_chunks {
            let path = chunk_dir.join(format!("chunk_{:06}", index));
            let mut chunk = std::fs::File::open(&path)?;
            loop {
                let n = chunk.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                out.write_all(&buf[..n])?;
                size += n as u64;
            }
        }
        out.sync_all()?;
        Ok((format!("{:x}", hasher.finalize()), size))
    })
    .await
    .map_err(anyhow::Error::from)??;
    Ok(result)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
