//! Server resource snapshots.
//!
//! A probe reads CPU, memory, disk and network counters; each capture is stored
//! with the current active/transcoding session counts. Old rows are pruned by
//! the cleanup loop.

use crate::db::metrics::{self, NewServerMetric, ServerMetric};
use crate::db::sessions;
use crate::db::Db;
use crate::error::{ArrboardError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use sysinfo::{Disks, Networks, System};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub network_rx_bps: f64,
    pub network_tx_bps: f64,
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

pub trait ResourceProbe: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Probe backed by `sysinfo`.
pub struct SysinfoProbe {
    sys: System,
    disks: Disks,
    networks: Networks,
    last_refresh: Instant,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        Self {
            sys,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            last_refresh: Instant::now(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&mut self) -> ResourceSample {
        self.sys.refresh_cpu_usage();
        self.sys.refresh_memory();
        self.disks.refresh();
        self.networks.refresh();

        let elapsed = self.last_refresh.elapsed().as_secs_f64().max(1.0);
        self.last_refresh = Instant::now();

        let (disk_total, disk_available) = self
            .disks
            .iter()
            .fold((0u64, 0u64), |(total, available), disk| {
                (total + disk.total_space(), available + disk.available_space())
            });
        let (rx, tx) = self
            .networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_, data)| {
                (rx + data.received(), tx + data.transmitted())
            });

        ResourceSample {
            cpu_percent: self.sys.global_cpu_usage() as f64,
            memory_used_bytes: self.sys.used_memory(),
            memory_total_bytes: self.sys.total_memory(),
            disk_used_bytes: disk_total.saturating_sub(disk_available),
            disk_total_bytes: disk_total,
            network_rx_bps: rx as f64 / elapsed,
            network_tx_bps: tx as f64 / elapsed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Success,
    Warning,
    Error,
}

/// Two-threshold band: below `warning` is fine, below `error` is a warning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub warning: f64,
    pub error: f64,
}

impl Band {
    pub const CPU: Band = Band { warning: 70.0, error: 90.0 };
    pub const MEMORY: Band = Band { warning: 80.0, error: 95.0 };
    pub const DISK: Band = Band { warning: 85.0, error: 95.0 };

    pub fn classify(&self, value: f64) -> Health {
        if value < self.warning {
            Health::Success
        } else if value < self.error {
            Health::Warning
        } else {
            Health::Error
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classified {
    pub value: f64,
    pub status: Health,
}

impl Classified {
    fn new(value: f64, band: Band) -> Self {
        Self {
            value,
            status: band.classify(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsView {
    pub captured_at: DateTime<Utc>,
    pub cpu: Classified,
    pub memory: Classified,
    pub disk: Classified,
    pub memory_used_bytes: i64,
    pub memory_total_bytes: i64,
    pub disk_used_bytes: i64,
    pub disk_total_bytes: i64,
    pub network_rx_bps: f64,
    pub network_tx_bps: f64,
    pub active_sessions: i64,
    pub transcoding_sessions: i64,
}

impl From<ServerMetric> for MetricsView {
    fn from(m: ServerMetric) -> Self {
        Self {
            captured_at: m.captured_at,
            cpu: Classified::new(m.cpu_percent, Band::CPU),
            memory: Classified::new(m.memory_percent, Band::MEMORY),
            disk: Classified::new(m.disk_percent, Band::DISK),
            memory_used_bytes: m.memory_used_bytes,
            memory_total_bytes: m.memory_total_bytes,
            disk_used_bytes: m.disk_used_bytes,
            disk_total_bytes: m.disk_total_bytes,
            network_rx_bps: m.network_rx_bps,
            network_tx_bps: m.network_tx_bps,
            active_sessions: m.active_sessions,
            transcoding_sessions: m.transcoding_sessions,
        }
    }
}

pub struct MetricsService {
    db: Arc<Db>,
    probe: Mutex<Box<dyn ResourceProbe>>,
    retention: ChronoDuration,
}

impl MetricsService {
    pub fn new(db: Arc<Db>, probe: Box<dyn ResourceProbe>, retention_days: i64) -> Self {
        Self {
            db,
            probe: Mutex::new(probe),
            retention: ChronoDuration::days(retention_days),
        }
    }

    pub async fn capture(&self) -> Result<i64> {
        self.capture_at(Utc::now()).await
    }

    pub async fn capture_at(&self, now: DateTime<Utc>) -> Result<i64> {
        let sample = {
            let mut probe = self
                .probe
                .lock()
                .map_err(|_| ArrboardError::Unknown("metrics probe lock poisoned".to_string()))?;
            probe.sample()
        };

        let mut conn = self.db.acquire().await?;
        let (active, transcoding) = sessions::active_counts(&mut conn).await?;

        let metric = NewServerMetric {
            cpu_percent: sample.cpu_percent,
            memory_percent: percent(sample.memory_used_bytes, sample.memory_total_bytes),
            memory_used_bytes: sample.memory_used_bytes as i64,
            memory_total_bytes: sample.memory_total_bytes as i64,
            disk_percent: percent(sample.disk_used_bytes, sample.disk_total_bytes),
            disk_used_bytes: sample.disk_used_bytes as i64,
            disk_total_bytes: sample.disk_total_bytes as i64,
            network_rx_bps: sample.network_rx_bps,
            network_tx_bps: sample.network_tx_bps,
            active_sessions: active,
            transcoding_sessions: transcoding,
        };
        let id = metrics::insert(&mut conn, &metric, now).await?;
        debug!(id, cpu = metric.cpu_percent, active, "Captured server metrics");
        Ok(id)
    }

    pub async fn latest(&self) -> Result<Option<MetricsView>> {
        let mut conn = self.db.acquire().await?;
        Ok(metrics::latest(&mut conn).await?.map(MetricsView::from))
    }

    /// Delete snapshots older than the retention window.
    pub async fn prune_at(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut conn = self.db.acquire().await?;
        let deleted = metrics::delete_before(&mut conn, now - self.retention).await?;
        if deleted > 0 {
            info!(deleted, "Pruned old server metrics");
        }
        Ok(deleted)
    }

    pub async fn prune(&self) -> Result<u64> {
        self.prune_at(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(ResourceSample);

    impl ResourceProbe for FixedProbe {
        fn sample(&mut self) -> ResourceSample {
            self.0
        }
    }

    fn service(db: Arc<Db>) -> MetricsService {
        let probe = FixedProbe(ResourceSample {
            cpu_percent: 75.0,
            memory_used_bytes: 96,
            memory_total_bytes: 100,
            disk_used_bytes: 10,
            disk_total_bytes: 100,
            network_rx_bps: 1.0,
            network_tx_bps: 2.0,
        });
        MetricsService::new(db, Box::new(probe), 7)
    }

    #[test]
    fn test_bands() {
        assert_eq!(Band::CPU.classify(69.9), Health::Success);
        assert_eq!(Band::CPU.classify(70.0), Health::Warning);
        assert_eq!(Band::CPU.classify(90.0), Health::Error);
        assert_eq!(Band::MEMORY.classify(94.9), Health::Warning);
        assert_eq!(Band::DISK.classify(84.0), Health::Success);
        assert_eq!(Band::DISK.classify(95.0), Health::Error);
    }

    #[tokio::test]
    async fn test_capture_and_classify() {
        let db = Arc::new(Db::in_memory().await.unwrap());
        let sampler = service(db);
        sampler.capture().await.unwrap();

        let latest = sampler.latest().await.unwrap().unwrap();
        assert_eq!(latest.cpu.status, Health::Warning);
        assert_eq!(latest.memory.status, Health::Error);
        assert_eq!(latest.disk.status, Health::Success);
        assert_eq!(latest.active_sessions, 0);
    }

    #[tokio::test]
    async fn test_retention_prunes_old_rows() {
        let db = Arc::new(Db::in_memory().await.unwrap());
        let sampler = service(db.clone());
        let now = Utc::now();

        sampler.capture_at(now - ChronoDuration::days(10)).await.unwrap();
        sampler.capture_at(now - ChronoDuration::days(1)).await.unwrap();
        assert_eq!(sampler.prune_at(now).await.unwrap(), 1);

        let mut conn = db.acquire().await.unwrap();
        assert_eq!(metrics::count(&mut conn).await.unwrap(), 1);
    }
}
