//! Hardware tier detection and the per-tier threshold table.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{PlatformConfig, ProfileOverrides};

/// Hardware capability class of the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Pi5,
    Pi4,
    Pi3,
    PiZero,
    Unknown,
}

/// Ordered signature table, first match wins.
const SIGNATURES: &[(&str, Tier)] = &[
    ("BCM2712", Tier::Pi5),
    ("BCM2711", Tier::Pi4),
    ("BCM2837", Tier::Pi3),
    ("BCM2710", Tier::Pi3),
    ("BCM2835", Tier::PiZero),
];

impl Tier {
    pub fn from_signature(signature: &str) -> Tier {
        SIGNATURES
            .iter()
            .find(|(needle, _)| signature.contains(needle))
            .map_or(Tier::Unknown, |(_, tier)| *tier)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Pi5 => "pi5",
            Tier::Pi4 => "pi4",
            Tier::Pi3 => "pi3",
            Tier::PiZero => "pi_zero",
            Tier::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits the health monitor and the hub work against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformProfile {
    pub tier: Tier,
    pub max_temperature_warning_c: f32,
    pub max_temperature_critical_c: f32,
    pub min_disk_space_mb: u64,
    pub max_clients: usize,
    pub monitoring_interval_ms: u64,
}

impl PlatformProfile {
    pub fn for_tier(tier: Tier) -> Self {
        let (warning, critical, min_disk, clients, interval) = match tier {
            Tier::Pi5 => (80.0, 85.0, 1024, 15, 5_000),
            Tier::Pi4 => (70.0, 80.0, 1024, 10, 10_000),
            Tier::Pi3 => (70.0, 80.0, 1024, 5, 15_000),
            Tier::PiZero => (65.0, 75.0, 1024, 2, 30_000),
            Tier::Unknown => (60.0, 70.0, 1024, 2, 30_000),
        };

        Self {
            tier,
            max_temperature_warning_c: warning,
            max_temperature_critical_c: critical,
            min_disk_space_mb: min_disk,
            max_clients: clients,
            monitoring_interval_ms: interval,
        }
    }

    pub fn with_overrides(mut self, overrides: &ProfileOverrides) -> Self {
        if let Some(warning) = overrides.max_temperature_warning_c {
            self.max_temperature_warning_c = warning;
        }
        if let Some(critical) = overrides.max_temperature_critical_c {
            self.max_temperature_critical_c = critical;
        }
        if let Some(min_disk) = overrides.min_disk_space_mb {
            self.min_disk_space_mb = min_disk;
        }
        if let Some(clients) = overrides.max_clients {
            self.max_clients = clients;
        }
        if let Some(interval) = overrides.monitoring_interval_ms {
            self.monitoring_interval_ms = interval;
        }
        self
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms.max(1))
    }
}

/// Resolves the profile once and hands out the cached value afterwards.
#[derive(Debug)]
pub struct PlatformDetector {
    signature_path: PathBuf,
    overrides: ProfileOverrides,
    resolved: OnceLock<PlatformProfile>,
}

impl PlatformDetector {
    pub fn new(config: &PlatformConfig) -> Self {
        Self {
            signature_path: config.signature_path.clone(),
            overrides: config.overrides.clone(),
            resolved: OnceLock::new(),
        }
    }

    pub fn resolve(&self) -> &PlatformProfile {
        self.resolved.get_or_init(|| {
            let tier = self.detect_tier();
            let profile = PlatformProfile::for_tier(tier).with_overrides(&self.overrides);
            info!(tier = %profile.tier, "resolved platform profile");
            profile
        })
    }

    fn detect_tier(&self) -> Tier {
        if !cfg!(target_os = "linux") {
            debug!("not a linux host, falling back to unknown tier");
            return Tier::Unknown;
        }

        match std::fs::read_to_string(&self.signature_path) {
            Ok(contents) => Tier::from_signature(&contents),
            Err(e) => {
                debug!(
                    path = %self.signature_path.display(),
                    "could not read hardware signature ({e}), falling back to unknown tier"
                );
                Tier::Unknown
            }
        }
    }
}
