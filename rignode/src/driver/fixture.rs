//! Deterministic driver for tests: fixed frame contents, and an optional
//! injected failure some time after start.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use super::{CameraDriver, CameraHandle, DriverReport};
use crate::config::DriverConfig;

const FRAME: &[u8] = b"FIXTURE_FRAME___";

pub struct FixtureDriver {
    cfg: DriverConfig,
}

impl FixtureDriver {
    pub fn new(cfg: DriverConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl CameraDriver for FixtureDriver {
    fn detected(&self) -> bool {
        true
    }

    fn model(&self) -> String {
        "fixture".to_string()
    }

    async fn open(&self, path: &Path) -> anyhow::Result<Box<dyn CameraHandle>> {
        tokio::fs::File::create(path).await?;
        let (failure_tx, _) = watch::channel(None);
        Ok(Box::new(FixtureHandle {
            path: path.to_path_buf(),
            cfg: self.cfg.clone(),
            started_at: None,
            stop_tx: None,
            writer: None,
            failure_tx,
        }))
    }
}

struct FixtureHandle {
    path: PathBuf,
    cfg: DriverConfig,
    started_at: Option<Instant>,
    stop_tx: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<u64>>,
    failure_tx: watch::Sender<Option<String>>,
}

#[async_trait]
impl CameraHandle for FixtureHandle {
    async fn start(&mut self) -> anyhow::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let tick = Duration::from_millis(self.cfg.frame_interval_ms);
        let failure_tx = self.failure_tx.clone();
        let fail_after = self.cfg.fail_after_ms.map(Duration::from_millis);
        let writer = tokio::spawn(async move {
            let begun = Instant::now();
            let mut written: u64 = 0;
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        if let Some(after) = fail_after {
                            if begun.elapsed() >= after {
                                let _ = failure_tx.send(Some("injected fixture failure".to_string()));
                                break;
                            }
                        }
                        if file.write_all(FRAME).await.is_err() {
                            let _ = failure_tx.send(Some("write error".to_string()));
                            break;
                        }
                        written += FRAME.len() as u64;
                    }
                }
            }
            let _ = file.flush().await;
            written
        });
        self.started_at = Some(Instant::now());
        self.stop_tx = Some(stop_tx);
        self.writer = Some(writer);
        Ok(())
    }

    async fn stop(&mut self, grace: Duration) -> anyhow::Result<DriverReport> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(writer) = self.writer.take() {
            let _ = tokio::time::timeout(grace, writer).await;
        }
        let size_bytes = tokio::fs::metadata(&self.path).await.map(|m| m.len())?;
        Ok(DriverReport {
            size_bytes,
            duration_secs: self
                .started_at
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
            dropped_frames: 0,
        })
    }

    async fn abort(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        let _ = tokio::fs::remove_file(&self.path).await;
    }

    fn failures(&self) -> watch::Receiver<Option<String>> {
        self.failure_tx.subscribe()
    }
}
