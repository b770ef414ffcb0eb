//! Per-node recording state machine.
//!
//! ```text
//! IDLE ──arm──► ARMED ──start──► RECORDING ──stop──► FINALIZING ──ok──► IDLE
//!                 │                   │                    └──fail──► ERROR
//!                 └──abort──► IDLE    └──driver_fail──► ERROR ──reset──► IDLE
//! ```
//!
//! Transitions are serialized behind one mutex; status reads snapshot under
//! the same lock. The finalize step (driver flush, checksum, manifest)
//! releases the lock while the FINALIZING state keeps other transitions out.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use api::manifest::{
    ChecksumMeta, DeviceMeta, FileMeta, Manifest, QualityMeta, RecordingMeta, TimingMeta, VideoMeta,
};
use api::response::{
    ArmResponse, OffloadState, RecordingState, RecordingStatus, RecordingSummary, SelfTestReport,
    StartResponse,
};
use api::session;

use crate::config::Config;
use crate::driver::{CameraDriver, CameraHandle};
use crate::error::AppError;
use crate::result::Result;
use crate::sync::SyncMonitor;
use crate::system;

pub struct RecordingMachine {
    cfg: Config,
    driver: Arc<dyn CameraDriver>,
    sync: Arc<SyncMonitor>,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    state: RecordingState,
    active: Option<Active>,
    last_finalized: Option<RecordingSummary>,
    last_error: Option<String>,
}

struct Active {
    session_id: String,
    file_path: PathBuf,
    file_name: String,
    manifest_path: PathBuf,
    handle: Option<Box<dyn CameraHandle>>,
    started_wall: Option<DateTime<Utc>>,
    started_mono: Option<Instant>,
    sync_ok_at_start: bool,
    sync_offset_ms: f64,
    temps: Vec<f32>,
}

impl RecordingMachine {
    pub fn new(cfg: Config, driver: Arc<dyn CameraDriver>, sync: Arc<SyncMonitor>) -> Self {
        Self {
            cfg,
            driver,
            sync,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn camera_detected(&self) -> bool {
        self.driver.detected()
    }

    pub fn camera_model(&self) -> String {
        self.driver.model()
    }

    pub async fn snapshot(&self) -> RecordingStatus {
        let inner = self.inner.lock().await;
        let active = inner.active.as_ref();
        RecordingStatus {
            state: inner.state,
            session_id: active.map(|a| a.session_id.clone()),
            file_path: active.map(|a| a.file_path.display().to_string()),
            started_at: active.and_then(|a| a.started_wall),
            duration_secs: active
                .and_then(|a| a.started_mono)
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
            error: inner.last_error.clone(),
        }
    }

    pub async fn arm(&self, session_id: String) -> Result<ArmResponse> {
        if !session::is_valid(&session_id) {
            return Err(AppError::bad_request(format!(
                "session id {:?} does not match ^[A-Za-z0-9_]{{3,64}}$",
                session_id
            )));
        }
        let mut inner = self.inner.lock().await;
        if inner.state != RecordingState::Idle {
            return Err(AppError::conflict(format!(
                "cannot arm while {:?}",
                inner.state
            )));
        }
        if !self.driver.detected() {
            return Err(AppError::CameraAbsent("camera not detected".to_string()));
        }
        let (free, _total) = system::storage_stats(&self.cfg.storage.recordings_root);
        if free < self.cfg.storage.min_free_bytes {
            return Err(AppError::precondition(format!(
                "{:.1} GiB free, need {:.1}",
                free as f64 / GIB,
                self.cfg.storage.min_free_bytes as f64 / GIB
            )));
        }
        if !self.sync.within_tolerance() {
            let status = self.sync.snapshot();
            return Err(AppError::precondition(format!(
                "sync offset {} outside ±{} ms tolerance",
                status
                    .offset_ms
                    .map(|o| format!("{:.2} ms", o))
                    .unwrap_or_else(|| "unknown".to_string()),
                self.cfg.sync.tolerance_ms
            )));
        }

        let node_id = &self.cfg.node.id;
        let dir = self
            .cfg
            .storage
            .recordings_root
            .join(&session_id)
            .join(node_id);
        tokio::fs::create_dir_all(&dir).await?;
        let file_name = format!(
            "{}.{}",
            session::recording_id(&session_id, node_id),
            self.cfg.driver.container
        );
        let file_path = dir.join(&file_name);
        if let Some(last) = &inner.last_finalized {
            if last.session_id == session_id {
                return Err(AppError::conflict(format!(
                    "recording for session {} already finalized on this node",
                    session_id
                )));
            }
        }
        let manifest_path = file_path.with_extension("json");

        let handle = self
            .driver
            .open(&file_path)
            .await
            .map_err(|e| AppError::Driver(format!("driver open failed: {}", e)))?;

        let sync_status = self.sync.snapshot();
        inner.active = Some(Active {
            session_id: session_id.clone(),
            file_path: file_path.clone(),
            file_name,
            manifest_path,
            handle: Some(handle),
            started_wall: None,
            started_mono: None,
            sync_ok_at_start: self.sync.within_tolerance(),
            sync_offset_ms: sync_status.offset_ms.unwrap_or(0.0),
            temps: vec![system::temperature_c()],
        });
        inner.state = RecordingState::Armed;
        inner.last_error = None;
        info!(session_id, path = %file_path.display(), "armed");

        Ok(ArmResponse {
            ok: true,
            session_id,
            file_path: file_path.display().to_string(),
        })
    }

    pub async fn start(self: &Arc<Self>) -> Result<StartResponse> {
        let mut inner = self.inner.lock().await;
        if inner.state != RecordingState::Armed {
            return Err(AppError::conflict(format!(
                "cannot start while {:?}",
                inner.state
            )));
        }
        let start_err = {
            let active = inner
                .active
                .as_mut()
                .ok_or_else(|| AppError::Invariant("armed without active session".to_string()))?;
            let handle = active
                .handle
                .as_mut()
                .ok_or_else(|| AppError::Invariant("armed without driver handle".to_string()))?;
            handle.start().await.err()
        };
        if let Some(e) = start_err {
            inner.state = RecordingState::Error;
            inner.last_error = Some(e.to_string());
            return Err(AppError::Driver(format!("driver start failed: {}", e)));
        }
        let started_at = Utc::now();
        let sync_status = self.sync.snapshot();
        let sync_ok = self.sync.within_tolerance();
        let temperature = system::temperature_c();
        let session_id = {
            let active = inner.active.as_mut().expect("armed without active session");
            active.started_wall = Some(started_at);
            active.started_mono = Some(Instant::now());
            active.temps.push(temperature);
            active.sync_ok_at_start = sync_ok;
            active.sync_offset_ms = sync_status.offset_ms.unwrap_or(active.sync_offset_ms);
            active.session_id.clone()
        };
        inner.state = RecordingState::Recording;
        info!(session_id, "recording");

        let mut failures = inner
            .active
            .as_ref()
            .and_then(|a| a.handle.as_ref())
            .map(|h| h.failures())
            .ok_or_else(|| AppError::Invariant("recording without driver handle".to_string()))?;
        let machine = Arc::clone(self);
        let watched = session_id.clone();
        tokio::spawn(async move {
            while failures.changed().await.is_ok() {
                let reason = failures.borrow().clone();
                if let Some(reason) = reason {
                    machine.driver_fail(&watched, reason).await;
                    break;
                }
            }
        });

        Ok(StartResponse {
            session_id,
            started_at,
        })
    }

    /// Stop and finalize. Idempotent: a repeat for the most recently
    /// finalized session returns the same summary.
    pub async fn stop(&self, session_id: Option<String>) -> Result<RecordingSummary> {
        let deadline = Instant::now()
            + Duration::from_secs(self.cfg.driver.stop_grace_secs)
            + Duration::from_secs(30);
        loop {
            let mut inner = self.inner.lock().await;
            match inner.state {
                RecordingState::Recording => {
                    let active = inner.active.as_mut().ok_or_else(|| {
                        AppError::Invariant("recording without active session".to_string())
                    })?;
                    if let Some(ref want) = session_id {
                        if *want != active.session_id {
                            return Err(AppError::conflict(format!(
                                "recording session is {}, not {}",
                                active.session_id, want
                            )));
                        }
                    }
                    let handle = active.handle.take().ok_or_else(|| {
                        AppError::Invariant("recording without driver handle".to_string())
                    })?;
                    let ctx = FinalizeCtx {
                        session_id: active.session_id.clone(),
                        file_path: active.file_path.clone(),
                        file_name: active.file_name.clone(),
                        manifest_path: active.manifest_path.clone(),
                        started_wall: active.started_wall.unwrap_or_else(Utc::now),
                        sync_ok: active.sync_ok_at_start,
                        sync_offset_ms: active.sync_offset_ms,
                        temps: active.temps.clone(),
                    };
                    inner.state = RecordingState::Finalizing;
                    drop(inner);

                    let result = self.finalize(handle, ctx).await;
                    let mut inner = self.inner.lock().await;
                    return match result {
                        Ok(summary) => {
                            inner.state = RecordingState::Idle;
                            inner.active = None;
                            inner.last_finalized = Some(summary.clone());
                            info!(
                                session_id = summary.session_id,
                                size = summary.size_bytes,
                                "finalized"
                            );
                            Ok(summary)
                        }
                        Err(e) => {
                            error!("finalize failed: {}", e);
                            inner.state = RecordingState::Error;
                            inner.last_error = Some(e.to_string());
                            Err(AppError::Driver(format!("finalize failed: {}", e)))
                        }
                    };
                }
                RecordingState::Finalizing => {
                    drop(inner);
                    if Instant::now() > deadline {
                        return Err(AppError::conflict("finalize still in progress"));
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                RecordingState::Idle => {
                    if let Some(last) = &inner.last_finalized {
                        let matches = session_id
                            .as_deref()
                            .map(|s| s == last.session_id)
                            .unwrap_or(true);
                        if matches {
                            return Ok(last.clone());
                        }
                    }
                    return Err(AppError::conflict("not recording"));
                }
                RecordingState::Armed => {
                    return Err(AppError::conflict("armed but not recording, use abort"));
                }
                RecordingState::Error => {
                    return Err(AppError::conflict(format!(
                        "node in error state: {}",
                        inner.last_error.clone().unwrap_or_default()
                    )));
                }
            }
        }
    }

    pub async fn abort(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != RecordingState::Armed {
            return Err(AppError::conflict(format!(
                "cannot abort while {:?}",
                inner.state
            )));
        }
        if let Some(mut active) = inner.active.take() {
            if let Some(mut handle) = active.handle.take() {
                handle.abort().await;
            }
            info!(session_id = active.session_id, "aborted");
        }
        inner.state = RecordingState::Idle;
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != RecordingState::Error {
            return Err(AppError::conflict(format!(
                "cannot reset while {:?}",
                inner.state
            )));
        }
        // the failed file is preserved on disk for manual recovery
        inner.active = None;
        inner.state = RecordingState::Idle;
        inner.last_error = None;
        Ok(())
    }

    async fn driver_fail(&self, session_id: &str, reason: String) {
        let mut inner = self.inner.lock().await;
        let matches = inner
            .active
            .as_ref()
            .map(|a| a.session_id == session_id)
            .unwrap_or(false);
        if inner.state == RecordingState::Recording && matches {
            warn!(session_id, reason, "driver failure, entering error state");
            inner.state = RecordingState::Error;
            inner.last_error = Some(reason);
            // dropping the handle tears the writer down; the partial file
            // stays where it is
            if let Some(active) = inner.active.as_mut() {
                active.handle = None;
            }
        }
    }

    async fn finalize(
        &self,
        mut handle: Box<dyn CameraHandle>,
        ctx: FinalizeCtx,
    ) -> anyhow::Result<RecordingSummary> {
        let grace = Duration::from_secs(self.cfg.driver.stop_grace_secs);
        let report = handle.stop(grace).await?;
        let (checksum, size_bytes) = system::sha256_file(&ctx.file_path).await?;
        let end_time = Utc::now();

        let mut temps = ctx.temps.clone();
        temps.push(system::temperature_c());
        let temp_max = temps.iter().cloned().fold(0.0_f32, f32::max);
        let temp_avg = temps.iter().sum::<f32>() / temps.len() as f32;

        let node_id = self.cfg.node.id.clone();
        let mut expected: Vec<String> = self
            .cfg
            .cluster
            .peers
            .iter()
            .map(|p| p.node_id.clone())
            .collect();
        if expected.is_empty() {
            expected.push(node_id.clone());
        }
        expected.sort();

        let manifest = Manifest {
            version: api::manifest::VERSION.to_string(),
            recording: RecordingMeta {
                id: session::recording_id(&ctx.session_id, &node_id),
                session_id: ctx.session_id.clone(),
                node_id: node_id.clone(),
                position: self.cfg.node.position,
            },
            file: FileMeta {
                name: ctx.file_name.clone(),
                size_bytes,
                container: self.cfg.driver.container.clone(),
                codec: self.cfg.driver.codec.clone(),
            },
            video: VideoMeta {
                width: self.cfg.driver.width,
                height: self.cfg.driver.height,
                fps: self.cfg.driver.fps,
                bitrate_mbps: self.cfg.driver.bitrate_mbps,
                duration_sec: report.duration_secs,
            },
            timing: TimingMeta {
                start_time: ctx.started_wall,
                end_time,
                sync_ok: ctx.sync_ok,
                sync_offset_ms: ctx.sync_offset_ms,
            },
            checksum: ChecksumMeta {
                algorithm: "sha256".to_string(),
                value: checksum.clone(),
            },
            device: DeviceMeta {
                hostname: system::host_name(),
                endpoint: self.cfg.node.endpoint.clone(),
                software_version: self.cfg.node.software_version.clone(),
            },
            quality: QualityMeta {
                dropped_frames: report.dropped_frames,
                temperature_avg_c: temp_avg,
                temperature_max_c: temp_max,
            },
            expected_cameras: expected,
        };
        tokio::fs::write(&ctx.manifest_path, manifest.to_json_pretty()).await?;

        Ok(RecordingSummary {
            recording_id: session::recording_id(&ctx.session_id, &node_id),
            session_id: ctx.session_id,
            node_id,
            file_path: ctx.file_path.display().to_string(),
            manifest_path: ctx.manifest_path.display().to_string(),
            size_bytes,
            duration_secs: report.duration_secs,
            dropped_frames: report.dropped_frames,
            checksum_sha256: checksum,
            offload_state: OffloadState::Local,
        })
    }

    /// Short local recording cycle used by the cluster self-check. The
    /// artifacts never reach the offload queue and are removed afterwards.
    pub async fn self_test(self: &Arc<Self>) -> SelfTestReport {
        let session_id = session::generate_test(Utc::now());
        let mut report = SelfTestReport {
            passed: false,
            camera_detected: self.driver.detected(),
            recording_started: false,
            recording_stopped: false,
            file_created: false,
            file_size_bytes: 0,
            duration_secs: 0.0,
            errors: vec![],
        };

        if let Err(e) = self.arm(session_id.clone()).await {
            report.errors.push(format!("arm failed: {:?}", e));
            return report;
        }
        if let Err(e) = self.start().await {
            report.errors.push(format!("start failed: {:?}", e));
            let _ = self.abort().await;
            return report;
        }
        report.recording_started = true;

        tokio::time::sleep(Duration::from_secs(self.cfg.driver.test_duration_secs)).await;

        match self.stop(Some(session_id.clone())).await {
            Ok(summary) => {
                report.recording_stopped = true;
                report.duration_secs = summary.duration_secs;
                let path = PathBuf::from(&summary.file_path);
                report.file_created = path.exists();
                report.file_size_bytes = summary.size_bytes;
                let _ = tokio::fs::remove_file(&path).await;
                let _ = tokio::fs::remove_file(&summary.manifest_path).await;
                let mut inner = self.inner.lock().await;
                if inner
                    .last_finalized
                    .as_ref()
                    .map(|l| l.session_id == session_id)
                    .unwrap_or(false)
                {
                    inner.last_finalized = None;
                }
            }
            Err(e) => report.errors.push(format!("stop failed: {:?}", e)),
        }

        report.passed = report.camera_detected
            && report.recording_started
            && report.recording_stopped
            && report.file_created
            && report.file_size_bytes > 0
            && report.errors.is_empty();
        report
    }

    /// Stop and finalize an in-progress recording before process exit.
    pub async fn shutdown(&self) {
        let state = self.inner.lock().await.state;
        match state {
            RecordingState::Recording => {
                let grace = Duration::from_secs(self.cfg.node.shutdown_grace_secs);
                if tokio::time::timeout(grace, self.stop(None)).await.is_err() {
                    warn!("shutdown finalize exceeded grace period");
                }
            }
            RecordingState::Armed => {
                let _ = self.abort().await;
            }
            _ => {}
        }
    }
}

struct FinalizeCtx {
    session_id: String,
    file_path: PathBuf,
    file_name: String,
    manifest_path: PathBuf,
    started_wall: DateTime<Utc>,
    sync_ok: bool,
    sync_offset_ms: f64,
    temps: Vec<f32>,
}

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::driver;

    fn test_config(root: &std::path::Path) -> Config {
        let mut cfg = Config::default();
        cfg.node.id = "CAM_C".to_string();
        cfg.storage.recordings_root = root.to_path_buf();
        cfg.storage.min_free_bytes = 0;
        cfg.sync.is_master = true;
        cfg.driver.kind = "fixture".to_string();
        cfg.driver.frame_interval_ms = 10;
        cfg.driver.stop_grace_secs = 2;
        cfg.driver.test_duration_secs = 1;
        cfg
    }

    fn machine(cfg: Config) -> Arc<RecordingMachine> {
        let driver = driver::from_config(&cfg.driver).unwrap();
        let sync = Arc::new(SyncMonitor::new(cfg.sync.clone(), &cfg.node));
        Arc::new(RecordingMachine::new(cfg, driver, sync))
    }

    #[tokio::test]
    async fn full_cycle_and_idempotent_stop() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(test_config(dir.path()));

        assert_eq!(m.snapshot().await.state, RecordingState::Idle);
        m.arm("GAME_TEST_001".to_string()).await.unwrap();
        assert_eq!(m.snapshot().await.state, RecordingState::Armed);
        m.start().await.unwrap();
        assert_eq!(m.snapshot().await.state, RecordingState::Recording);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let first = m.stop(None).await.unwrap();
        assert_eq!(m.snapshot().await.state, RecordingState::Idle);
        assert!(first.size_bytes > 0);
        assert!(!first.checksum_sha256.is_empty());
        assert!(std::path::Path::new(&first.manifest_path).exists());

        // second stop for the same session replays the summary
        let second = m.stop(Some("GAME_TEST_001".to_string())).await.unwrap();
        assert_eq!(first.checksum_sha256, second.checksum_sha256);
        assert_eq!(first.size_bytes, second.size_bytes);
    }

    #[tokio::test]
    async fn rejects_forbidden_transitions() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(test_config(dir.path()));

        assert!(matches!(m.stop(None).await, Err(AppError::Conflict(_))));
        assert!(matches!(m.abort().await, Err(AppError::Conflict(_))));
        assert!(matches!(m.reset().await, Err(AppError::Conflict(_))));
        assert!(matches!(m.start().await, Err(AppError::Conflict(_))));

        m.arm("GAME_TEST_002".to_string()).await.unwrap();
        assert!(matches!(
            m.arm("GAME_TEST_002b".to_string()).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(m.stop(None).await, Err(AppError::Conflict(_))));

        m.start().await.unwrap();
        assert!(matches!(m.start().await, Err(AppError::Conflict(_))));
        assert!(matches!(m.abort().await, Err(AppError::Conflict(_))));
        m.stop(None).await.unwrap();
    }

    #[tokio::test]
    async fn abort_discards_reserved_file() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(test_config(dir.path()));

        let armed = m.arm("GAME_TEST_003".to_string()).await.unwrap();
        assert!(std::path::Path::new(&armed.file_path).exists());
        m.abort().await.unwrap();
        assert_eq!(m.snapshot().await.state, RecordingState::Idle);
        assert!(!std::path::Path::new(&armed.file_path).exists());
    }

    #[tokio::test]
    async fn rejects_bad_session_ids() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(test_config(dir.path()));
        assert!(matches!(
            m.arm("no spaces".to_string()).await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            m.arm("ab".to_string()).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn driver_failure_enters_error_and_reset_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.driver.fail_after_ms = Some(30);
        let m = machine(cfg);

        m.arm("GAME_TEST_004".to_string()).await.unwrap();
        let armed_path = {
            let snap = m.snapshot().await;
            snap.file_path.unwrap()
        };
        m.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(m.snapshot().await.state, RecordingState::Error);

        // the partial file is preserved
        assert!(std::path::Path::new(&armed_path).exists());
        assert!(matches!(m.stop(None).await, Err(AppError::Conflict(_))));
        m.reset().await.unwrap();
        assert_eq!(m.snapshot().await.state, RecordingState::Idle);
    }

    #[tokio::test]
    async fn sync_gating_blocks_arm_on_unsynced_slave() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.sync = SyncConfig {
            is_master: false,
            master_endpoint: "http://127.0.0.1:1".to_string(),
            ..SyncConfig::default()
        };
        let m = machine(cfg);
        assert!(matches!(
            m.arm("GAME_TEST_005".to_string()).await,
            Err(AppError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn self_test_cleans_up_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let m = machine(test_config(dir.path()));
        let report = m.self_test().await;
        assert!(report.passed, "errors: {:?}", report.errors);
        assert!(report.file_size_bytes > 0);
        // nothing is left behind for the offload worker to pick up
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut leftovers = vec![];
        while let Some(entry) = entries.next_entry().await.unwrap() {
            let mut inner = tokio::fs::read_dir(entry.path()).await.unwrap();
            while let Some(nested) = inner.next_entry().await.unwrap() {
                let mut files = tokio::fs::read_dir(nested.path()).await.unwrap();
                while let Some(file) = files.next_entry().await.unwrap() {
                    leftovers.push(file.path());
                }
            }
        }
        assert!(leftovers.is_empty(), "leftovers: {:?}", leftovers);
    }
}
