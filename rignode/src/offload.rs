//! Upload worker: moves finalized recordings (plus manifests) to the ingest
//! server over the chunked, resumable protocol and verifies the server-side
//! hash before a recording counts as CONFIRMED. One upload at a time per
//! node; retries with exponential backoff and jitter.

use std::collections::{HashMap, HashSet};
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use api::manifest::Manifest;
use api::request::{UploadConfirm, UploadFinalize, UploadInit};
use api::response::{
    IngestHealth, OffloadJobStatus, OffloadState, OffloadStatusReport, UploadConfirmResponse,
    UploadFinalizeResponse, UploadInitResponse,
};

use crate::config::{OffloadConfig, StorageConfig};
use crate::system;

#[derive(Debug, Clone)]
pub struct OffloadJob {
    pub recording_id: String,
    pub session_id: String,
    pub node_id: String,
    pub file_path: PathBuf,
    pub manifest_path: PathBuf,
}

#[derive(Debug)]
enum UploadError {
    /// Worth another attempt: network trouble, 5xx, hash disagreement.
    Retryable(String),
    /// Do not retry: 4xx, missing file, malformed manifest.
    Fatal(String),
    ChecksumMismatch(String),
}

impl UploadError {
    fn describe(&self) -> String {
        match self {
            UploadError::Retryable(m) => m.clone(),
            UploadError::Fatal(m) => m.clone(),
            UploadError::ChecksumMismatch(m) => format!("checksum mismatch: {}", m),
        }
    }
}

#[derive(Clone)]
pub struct OffloadClient {
    cfg: OffloadConfig,
    storage: StorageConfig,
    client: reqwest::Client,
    tx: mpsc::UnboundedSender<OffloadJob>,
    jobs: Arc<RwLock<HashMap<String, OffloadJobStatus>>>,
}

impl OffloadClient {
    pub fn new(
        cfg: OffloadConfig,
        storage: StorageConfig,
    ) -> (Self, mpsc::UnboundedReceiver<OffloadJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                cfg,
                storage,
                client: reqwest::Client::new(),
                tx,
                jobs: Arc::new(RwLock::new(HashMap::new())),
            },
            rx,
        )
    }

    pub fn enqueue(&self, job: OffloadJob) {
        self.jobs.write().unwrap().insert(
            job.recording_id.clone(),
            OffloadJobStatus {
                recording_id: job.recording_id.clone(),
                session_id: job.session_id.clone(),
                state: OffloadState::Local,
                attempts: 0,
                error: None,
            },
        );
        info!(recording_id = job.recording_id, "queued for offload");
        let _ = self.tx.send(job);
    }

    pub fn state_of(&self, recording_id: &str) -> Option<OffloadState> {
        self.jobs
            .read()
            .unwrap()
            .get(recording_id)
            .map(|j| j.state)
    }

    fn update<F: FnOnce(&mut OffloadJobStatus)>(&self, recording_id: &str, f: F) {
        if let Some(job) = self.jobs.write().unwrap().get_mut(recording_id) {
            f(job);
        }
    }

    pub async fn server_health(&self) -> Option<IngestHealth> {
        let url = format!("{}{}", self.cfg.server_url, api::path::HEALTH);
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .ok()?;
        resp.json().await.ok()
    }

    pub async fn report(&self) -> OffloadStatusReport {
        let jobs: Vec<OffloadJobStatus> = {
            let map = self.jobs.read().unwrap();
            let mut jobs: Vec<_> = map.values().cloned().collect();
            jobs.sort_by(|a, b| a.recording_id.cmp(&b.recording_id));
            jobs
        };
        let pending = jobs
            .iter()
            .filter(|j| matches!(j.state, OffloadState::Local | OffloadState::Uploading))
            .count();
        OffloadStatusReport {
            enabled: self.cfg.auto_upload,
            server_url: self.cfg.server_url.clone(),
            server_healthy: self.server_health().await.is_some(),
            pending,
            jobs,
        }
    }

    pub async fn worker(self, mut rx: mpsc::UnboundedReceiver<OffloadJob>) {
        while let Some(job) = rx.recv().await {
            self.process(job).await;
        }
    }

    async fn process(&self, job: OffloadJob) {
        for attempt in 1..=self.cfg.max_attempts {
            self.update(&job.recording_id, |j| {
                j.state = OffloadState::Uploading;
                j.attempts = attempt;
            });
            let delay = backoff_delay(attempt, self.cfg.retry_base_secs);
            if !delay.is_zero() {
                tokio::time::sleep(delay + jitter()).await;
            }

            match self.try_upload(&job).await {
                Ok(checksum) => {
                    self.update(&job.recording_id, |j| {
                        j.state = OffloadState::Confirmed;
                        j.error = None;
                    });
                    info!(
                        recording_id = job.recording_id,
                        checksum, "offload confirmed"
                    );
                    if self.storage.delete_after_confirm {
                        // the manifest stays behind as a local breadcrumb
                        let _ = tokio::fs::remove_file(&job.file_path).await;
                        info!(recording_id = job.recording_id, "local file removed");
                    }
                    return;
                }
                Err(UploadError::Fatal(msg)) => {
                    warn!(recording_id = job.recording_id, "offload failed: {}", msg);
                    self.update(&job.recording_id, |j| {
                        j.state = OffloadState::Failed;
                        j.error = Some(msg);
                    });
                    return;
                }
                Err(e) => {
                    let msg = e.describe();
                    warn!(
                        recording_id = job.recording_id,
                        attempt, "offload attempt failed: {}", msg
                    );
                    self.update(&job.recording_id, |j| j.error = Some(msg));
                }
            }
        }
        self.update(&job.recording_id, |j| j.state = OffloadState::Failed);
        warn!(
            recording_id = job.recording_id,
            attempts = self.cfg.max_attempts,
            "offload retry budget exhausted"
        );
    }

    /// One full pass of the protocol: init, manifest, missing chunks,
    /// finalize, confirm. A checksum disagreement surfaces as retryable;
    /// the server drops its partial so the next pass starts clean.
    async fn try_upload(&self, job: &OffloadJob) -> Result<String, UploadError> {
        let manifest_bytes = tokio::fs::read(&job.manifest_path)
            .await
            .map_err(|e| UploadError::Fatal(format!("manifest unreadable: {}", e)))?;
        let manifest = Manifest::from_json(&manifest_bytes)
            .map_err(|e| UploadError::Fatal(e.to_string()))?;
        let checksum = manifest.checksum.value.clone();
        if checksum.is_empty() {
            return Err(UploadError::Fatal("manifest carries no checksum".to_string()));
        }
        let meta = tokio::fs::metadata(&job.file_path)
            .await
            .map_err(|e| UploadError::Fatal(format!("recording file missing: {}", e)))?;
        let file_size = meta.len();
        let chunk_size = self.cfg.chunk_size.max(1);
        let total_chunks = file_size.div_ceil(chunk_size) as u32;

        let init: UploadInitResponse = self
            .post_json(
                api::path::UPLOAD_INIT,
                &UploadInit {
                    node_id: job.node_id.clone(),
                    session_id: job.session_id.clone(),
                    recording_id: job.recording_id.clone(),
                    file_size,
                    chunk_size,
                    checksum: checksum.clone(),
                },
            )
            .await?;
        let received: HashSet<u32> = init.received_chunks.iter().copied().collect();

        let manifest_value: serde_json::Value = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| UploadError::Fatal(e.to_string()))?;
        let _: serde_json::Value = self
            .post_json(&api::path::session_manifest(&job.session_id), &manifest_value)
            .await?;

        let mut file = tokio::fs::File::open(&job.file_path)
            .await
            .map_err(|e| UploadError::Fatal(format!("recording file missing: {}", e)))?;
        for index in 0..total_chunks {
            if received.contains(&index) {
                continue;
            }
            let offset = index as u64 * chunk_size;
            let len = chunk_size.min(file_size - offset) as usize;
            let mut buf = vec![0u8; len];
            file.seek(SeekFrom::Start(offset))
                .await
                .map_err(|e| UploadError::Retryable(e.to_string()))?;
            file.read_exact(&mut buf)
                .await
                .map_err(|e| UploadError::Retryable(e.to_string()))?;
            let chunk_hash = system::sha256_bytes(&buf);

            let form = reqwest::multipart::Form::new()
                .text("upload_id", init.upload_id.clone())
                .text("chunk_index", index.to_string())
                .text("chunk_hash", chunk_hash)
                .part(
                    "chunk",
                    reqwest::multipart::Part::bytes(buf).file_name("chunk"),
                );
            let url = format!("{}{}", self.cfg.server_url, api::path::UPLOAD_CHUNK);
            let resp = self
                .client
                .post(url)
                .multipart(form)
                .send()
                .await
                .map_err(|e| UploadError::Retryable(e.to_string()))?;
            Self::check_status(&resp)?;
        }

        self.update(&job.recording_id, |j| j.state = OffloadState::Uploaded);
        let finalize: UploadFinalizeResponse = self
            .post_json(
                api::path::UPLOAD_FINALIZE,
                &UploadFinalize {
                    upload_id: init.upload_id.clone(),
                    total_chunks,
                },
            )
            .await?;
        if finalize.checksum_sha256 != checksum {
            return Err(UploadError::ChecksumMismatch(format!(
                "server {} != local {}",
                finalize.checksum_sha256, checksum
            )));
        }

        let confirm: UploadConfirmResponse = self
            .post_json(
                api::path::UPLOAD_CONFIRM,
                &UploadConfirm {
                    session_id: job.session_id.clone(),
                    node_id: job.node_id.clone(),
                },
            )
            .await?;
        if confirm.checksum_sha256 != checksum {
            return Err(UploadError::ChecksumMismatch(format!(
                "confirm {} != local {}",
                confirm.checksum_sha256, checksum
            )));
        }
        Ok(checksum)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, UploadError> {
        let url = format!("{}{}", self.cfg.server_url, path);
        let resp = self
            .client
            .post(url)
            .json(body)
            .timeout(Duration::from_secs(300))
            .send()
            .await
            .map_err(|e| UploadError::Retryable(e.to_string()))?;
        Self::check_status(&resp)?;
        resp.json()
            .await
            .map_err(|e| UploadError::Retryable(e.to_string()))
    }

    fn check_status(resp: &reqwest::Response) -> Result<(), UploadError> {
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() {
            Err(UploadError::Retryable(format!("server error: {}", status)))
        } else {
            Err(UploadError::Fatal(format!("rejected by server: {}", status)))
        }
    }
}

/// Attempt 1 goes out immediately; later attempts wait 5, 10, 20, 40 s
/// (base 5) before jitter.
fn backoff_delay(attempt: u32, base_secs: u64) -> Duration {
    if attempt <= 1 {
        Duration::ZERO
    } else {
        Duration::from_secs(base_secs << (attempt - 2).min(16))
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..1000))
}
