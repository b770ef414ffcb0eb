//! Software stand-in for the camera: writes synthetic frames at the
//! configured bitrate so the rest of the pipeline sees realistic files.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CameraDriver, CameraHandle, DriverReport};
use crate::config::DriverConfig;

pub struct SimulatedDriver {
    cfg: DriverConfig,
}

impl SimulatedDriver {
    pub fn new(cfg: DriverConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl CameraDriver for SimulatedDriver {
    fn detected(&self) -> bool {
        true
    }

    fn model(&self) -> String {
        format!("simulated-{}x{}", self.cfg.width, self.cfg.height)
    }

    async fn open(&self, path: &Path) -> anyhow::Result<Box<dyn CameraHandle>> {
        tokio::fs::File::create(path).await?;
        Ok(Box::new(SimulatedHandle::new(path.to_path_buf(), self.cfg.clone())))
    }
}

struct SimulatedHandle {
    path: PathBuf,
    cfg: DriverConfig,
    started_at: Option<Instant>,
    stop_tx: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<u64>>,
    failure_tx: watch::Sender<Option<String>>,
}

impl SimulatedHandle {
    fn new(path: PathBuf, cfg: DriverConfig) -> Self {
        let (failure_tx, _) = watch::channel(None);
        Self {
            path,
            cfg,
            started_at: None,
            stop_tx: None,
            writer: None,
            failure_tx,
        }
    }

    fn bytes_per_tick(&self) -> usize {
        let bytes_per_sec = self.cfg.bitrate_mbps as u64 * 1_000_000 / 8;
        (bytes_per_sec * self.cfg.frame_interval_ms / 1000).max(16) as usize
    }
}

#[async_trait]
impl CameraHandle for SimulatedHandle {
    async fn start(&mut self) -> anyhow::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let tick = Duration::from_millis(self.cfg.frame_interval_ms);
        let frame = vec![0xA5u8; self.bytes_per_tick()];
        let failure_tx = self.failure_tx.clone();
        let writer = tokio::spawn(async move {
            let mut written: u64 = 0;
            let mut interval = tokio::time::interval(tick);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        if let Err(e) = file.write_all(&frame).await {
                            let _ = failure_tx.send(Some(format!("write error: {}", e)));
                            break;
                        }
                        written += frame.len() as u64;
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
            match tokio::time::timeout(grace, writer).await {
                Ok(Ok(written)) => debug!(written, "simulated capture flushed"),
                Ok(Err(e)) => warn!("simulated writer panicked: {}", e),
                Err(_) => warn!("simulated writer exceeded stop grace, closing"),
            }
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
