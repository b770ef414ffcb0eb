//! Camera driver seam. The recorder treats the driver as a black box that
//! owns the recording file between `open` and `stop`/`abort`; the real
//! hardware driver lives outside this crate and plugs in through the same
//! trait.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::DriverConfig;

mod fixture;
mod simulated;

pub use fixture::FixtureDriver;
pub use simulated::SimulatedDriver;

#[derive(Debug, Clone, Default)]
pub struct DriverReport {
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub dropped_frames: u64,
}

#[async_trait]
pub trait CameraDriver: Send + Sync {
    fn detected(&self) -> bool;
    fn model(&self) -> String;
    /// Reserve `path` and hand back a session handle. The file exists when
    /// this returns.
    async fn open(&self, path: &Path) -> anyhow::Result<Box<dyn CameraHandle>>;
}

#[async_trait]
pub trait CameraHandle: Send {
    async fn start(&mut self) -> anyhow::Result<()>;
    /// Stop capture, flushing for at most `grace` before the writer is
    /// forcefully closed.
    async fn stop(&mut self, grace: Duration) -> anyhow::Result<DriverReport>;
    /// Tear down and remove the reserved file.
    async fn abort(&mut self);
    /// Receiver that flips to `Some(reason)` on an asynchronous capture
    /// failure (device disconnect, write error).
    fn failures(&self) -> watch::Receiver<Option<String>>;
}

pub fn from_config(cfg: &DriverConfig) -> anyhow::Result<Arc<dyn CameraDriver>> {
    match cfg.kind.as_str() {
        "simulated" => Ok(Arc::new(SimulatedDriver::new(cfg.clone()))),
        "fixture" => Ok(Arc::new(FixtureDriver::new(cfg.clone()))),
        other => anyhow::bail!("unknown driver kind: {}", other),
    }
}
