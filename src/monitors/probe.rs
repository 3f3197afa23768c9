//! Readers for the host's vital signs.
//!
//! Each reader is independent and reports `None` when its source is not
//! available, so one missing signal never costs the rest of the sample.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::{Disks, System};
use tracing::{debug, error, trace, warn};

use crate::{DiskSpace, HealthSample, ThrottleState};

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn read_temperature(&self) -> Option<f32>;

    async fn read_throttle_state(&self) -> Option<ThrottleState>;

    async fn read_disk_space(&self) -> Option<DiskSpace>;

    /// Used memory in percent of total
    async fn read_memory(&self) -> Option<f32>;

    /// One-minute load average per logical CPU, in percent
    async fn read_load(&self) -> Option<f32>;
}

/// Run every reader concurrently and assemble one sample.
///
/// Each reader runs in its own task and gets at most `limit`; a reader that
/// hangs or panics leaves only its own field empty.
pub async fn gather(probe: Arc<dyn HealthProbe>, limit: Duration) -> HealthSample {
    let (temperature_c, throttling, disk, memory_used_percent, load_1m_percent) = tokio::join!(
        bounded("temperature", limit, {
            let probe = probe.clone();
            async move { probe.read_temperature().await }
        }),
        bounded("throttling", limit, {
            let probe = probe.clone();
            async move { probe.read_throttle_state().await }
        }),
        bounded("disk", limit, {
            let probe = probe.clone();
            async move { probe.read_disk_space().await }
        }),
        bounded("memory", limit, {
            let probe = probe.clone();
            async move { probe.read_memory().await }
        }),
        bounded("load", limit, {
            let probe = probe.clone();
            async move { probe.read_load().await }
        }),
    );

    HealthSample {
        timestamp: Utc::now(),
        temperature_c,
        throttling,
        disk,
        memory_used_percent,
        load_1m_percent,
    }
}

async fn bounded<T, F>(field: &'static str, limit: Duration, read: F) -> Option<T>
where
    T: Send + 'static,
    F: Future<Output = Option<T>> + Send + 'static,
{
    let task = tokio::spawn(read);
    let abort = task.abort_handle();

    match tokio::time::timeout(limit, task).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            error!("{field} reader failed: {e}");
            None
        }
        Err(_) => {
            abort.abort();
            warn!("{field} reader gave no answer within {}ms", limit.as_millis());
            None
        }
    }
}

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Probe reading from the local machine.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    thermal_zone: PathBuf,
    disk_mount: PathBuf,
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self {
            thermal_zone: PathBuf::from(THERMAL_ZONE),
            disk_mount: PathBuf::from("/"),
        }
    }
}

impl SystemProbe {
    pub fn new(thermal_zone: impl Into<PathBuf>, disk_mount: impl Into<PathBuf>) -> Self {
        Self {
            thermal_zone: thermal_zone.into(),
            disk_mount: disk_mount.into(),
        }
    }
}

pub fn parse_millidegrees(raw: &str) -> Option<f32> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .map(|milli| milli as f32 / 1000.0)
}

/// Parse `vcgencmd get_throttled` output, e.g. `throttled=0x50005`.
pub fn parse_throttled(raw: &str) -> Option<ThrottleState> {
    let value = raw.trim().strip_prefix("throttled=")?;
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(hex, 16)
        .ok()
        .map(ThrottleState::from_bits)
}

fn disk_space_for(mount: &Path) -> Option<DiskSpace> {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks.list().iter().find(|disk| disk.mount_point() == mount)?;

    let total = disk.total_space();
    let available = disk.available_space();
    if total == 0 {
        return None;
    }

    Some(DiskSpace {
        available_mb: available / (1024 * 1024),
        used_percent: ((total - available.min(total)) as f64 / total as f64 * 100.0) as f32,
    })
}

fn memory_used_percent() -> Option<f32> {
    let mut system = System::new();
    system.refresh_memory();

    let total = system.total_memory();
    if total == 0 {
        return None;
    }
    Some((system.used_memory() as f64 / total as f64 * 100.0) as f32)
}

fn load_percent() -> Option<f32> {
    let cpus = std::thread::available_parallelism().ok()?.get();
    let load = System::load_average().one;
    Some(((load / cpus as f64) * 100.0).min(100.0) as f32)
}

#[async_trait]
impl HealthProbe for SystemProbe {
    async fn read_temperature(&self) -> Option<f32> {
        match tokio::fs::read_to_string(&self.thermal_zone).await {
            Ok(raw) => parse_millidegrees(&raw),
            Err(e) => {
                trace!("temperature unavailable: {e}");
                None
            }
        }
    }

    async fn read_throttle_state(&self) -> Option<ThrottleState> {
        let output = tokio::process::Command::new("vcgencmd")
            .arg("get_throttled")
            .kill_on_drop(true)
            .output()
            .await
            .inspect_err(|e| trace!("vcgencmd unavailable: {e}"))
            .ok()?;

        if !output.status.success() {
            debug!("vcgencmd exited with {}", output.status);
            return None;
        }

        parse_throttled(&String::from_utf8_lossy(&output.stdout))
    }

    async fn read_disk_space(&self) -> Option<DiskSpace> {
        let mount = self.disk_mount.clone();
        tokio::task::spawn_blocking(move || disk_space_for(&mount))
            .await
            .ok()
            .flatten()
    }

    async fn read_memory(&self) -> Option<f32> {
        tokio::task::spawn_blocking(memory_used_percent)
            .await
            .ok()
            .flatten()
    }

    async fn read_load(&self) -> Option<f32> {
        load_percent()
    }
}
