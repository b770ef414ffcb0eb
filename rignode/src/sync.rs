//! Slave-side clock discipline. The master publishes its wall clock over
//! `GET /sync/time`; slaves sample it periodically and keep the estimated
//! offset:
//!
//! `offset ≈ ((m_recv + m_send) / 2) − ((s_send + s_recv) / 2)`
//!
//! A sample superseded by a newer one is discarded, so an in-flight query
//! never clobbers fresher state and never blocks a state transition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use api::request::SyncTimeQuery;
use api::response::{SyncQuality, SyncStatus, SyncTimeResponse};

use crate::config::{NodeConfig, SyncConfig};

#[derive(Debug, Default, Clone)]
struct Sample {
    offset_ms: Option<f64>,
    rtt_ms: Option<f64>,
    at: Option<Instant>,
    at_wall: Option<DateTime<Utc>>,
}

pub struct SyncMonitor {
    cfg: SyncConfig,
    node_id: String,
    endpoint: String,
    client: reqwest::Client,
    state: RwLock<Sample>,
    generation: AtomicU64,
}

impl SyncMonitor {
    pub fn new(cfg: SyncConfig, node: &NodeConfig) -> Self {
        Self {
            cfg,
            node_id: node.id.clone(),
            endpoint: node.endpoint.clone(),
            client: reqwest::Client::new(),
            state: RwLock::new(Sample::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn is_master(&self) -> bool {
        self.cfg.is_master
    }

    pub fn snapshot(&self) -> SyncStatus {
        if self.cfg.is_master {
            return SyncStatus {
                is_master: true,
                offset_ms: Some(0.0),
                rtt_ms: Some(0.0),
                quality: SyncQuality::Ok,
                last_sync: Some(Utc::now()),
            };
        }
        let sample = self.state.read().unwrap().clone();
        SyncStatus {
            is_master: false,
            offset_ms: sample.offset_ms,
            rtt_ms: sample.rtt_ms,
            quality: self.classify(&sample),
            last_sync: sample.at_wall,
        }
    }

    fn classify(&self, sample: &Sample) -> SyncQuality {
        let fresh = sample
            .at
            .map(|t| t.elapsed() <= Duration::from_secs(self.cfg.stale_secs))
            .unwrap_or(false);
        if !fresh {
            return SyncQuality::Fail;
        }
        let (offset, rtt) = match (sample.offset_ms, sample.rtt_ms) {
            (Some(o), Some(r)) => (o, r),
            _ => return SyncQuality::Fail,
        };
        if offset.abs() <= self.cfg.tolerance_ms && rtt <= self.cfg.rtt_max_ms {
            SyncQuality::Ok
        } else if offset.abs() <= 2.0 * self.cfg.tolerance_ms {
            SyncQuality::Warn
        } else {
            SyncQuality::Fail
        }
    }

    /// Admission gate for `arm` on a slave: the last successful sample is
    /// still within the staleness window and its offset within tolerance.
    pub fn within_tolerance(&self) -> bool {
        if self.cfg.is_master {
            return true;
        }
        let sample = self.state.read().unwrap().clone();
        let fresh = sample
            .at
            .map(|t| t.elapsed() <= Duration::from_secs(self.cfg.stale_secs))
            .unwrap_or(false);
        fresh
            && sample
                .offset_ms
                .map(|o| o.abs() <= self.cfg.tolerance_ms)
                .unwrap_or(false)
    }

    /// Local wall clock corrected onto the master's timeline.
    pub fn master_now(&self) -> DateTime<Utc> {
        let offset_ms = self
            .state
            .read()
            .unwrap()
            .offset_ms
            .filter(|_| !self.cfg.is_master)
            .unwrap_or(0.0);
        Utc::now() + chrono::Duration::microseconds((offset_ms * 1000.0) as i64)
    }

    /// One sync pass against the master. The result is dropped if a newer
    /// pass completed first.
    pub async fn sample(&self) -> anyhow::Result<SyncStatus> {
        if self.cfg.is_master {
            return Ok(self.snapshot());
        }
        if self.cfg.master_endpoint.is_empty() {
            anyhow::bail!("no master endpoint configured");
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let query = SyncTimeQuery {
            node_id: Some(self.node_id.clone()),
            endpoint: Some(self.endpoint.clone()),
        };
        let url = format!("{}{}", self.cfg.master_endpoint, api::path::SYNC_TIME);
        let s_send = Utc::now().timestamp_micros();
        let resp = self
            .client
            .get(url)
            .query(&query)
            .timeout(Duration::from_secs(2))
            .send()
            .await?
            .error_for_status()?;
        let body: SyncTimeResponse = resp.json().await?;
        let s_recv = Utc::now().timestamp_micros();

        let offset_us =
            (body.received_at_us + body.sent_at_us) as f64 / 2.0 - (s_send + s_recv) as f64 / 2.0;
        let rtt_us = (s_recv - s_send) - (body.sent_at_us - body.received_at_us);

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("sync sample superseded, discarding");
            return Ok(self.snapshot());
        }
        {
            let mut state = self.state.write().unwrap();
            state.offset_ms = Some(offset_us / 1000.0);
            state.rtt_ms = Some(rtt_us as f64 / 1000.0);
            state.at = Some(Instant::now());
            state.at_wall = Some(Utc::now());
        }
        Ok(self.snapshot())
    }

    pub async fn run(self: Arc<Self>) {
        if self.cfg.is_master {
            return;
        }
        let interval = Duration::from_secs(self.cfg.interval_secs);
        loop {
            if let Err(e) = self.sample().await {
                warn!("sync sample failed: {}", e);
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(cfg: SyncConfig) -> SyncMonitor {
        SyncMonitor::new(cfg, &NodeConfig::default())
    }

    fn slave_cfg() -> SyncConfig {
        SyncConfig {
            is_master: false,
            master_endpoint: String::new(),
            ..SyncConfig::default()
        }
    }

    #[test]
    fn master_is_always_in_tolerance() {
        let m = monitor(SyncConfig {
            is_master: true,
            ..SyncConfig::default()
        });
        assert!(m.within_tolerance());
        assert_eq!(m.snapshot().quality, SyncQuality::Ok);
    }

    #[test]
    fn unsampled_slave_fails_classification() {
        let m = monitor(slave_cfg());
        assert!(!m.within_tolerance());
        assert_eq!(m.snapshot().quality, SyncQuality::Fail);
        assert!(m.snapshot().offset_ms.is_none());
    }

    #[test]
    fn classification_bands() {
        let m = monitor(slave_cfg());
        let set = |offset: f64, rtt: f64| {
            let mut s = m.state.write().unwrap();
            s.offset_ms = Some(offset);
            s.rtt_ms = Some(rtt);
            s.at = Some(Instant::now());
            s.at_wall = Some(Utc::now());
        };
        set(1.0, 10.0);
        assert_eq!(m.snapshot().quality, SyncQuality::Ok);
        assert!(m.within_tolerance());

        set(8.0, 10.0);
        assert_eq!(m.snapshot().quality, SyncQuality::Warn);
        assert!(!m.within_tolerance());

        set(20.0, 10.0);
        assert_eq!(m.snapshot().quality, SyncQuality::Fail);

        // in-tolerance offset but saturated link
        set(1.0, 200.0);
        assert_eq!(m.snapshot().quality, SyncQuality::Warn);
        assert!(m.within_tolerance());
    }
}
