pub mod actors;
pub mod api;
pub mod config;
pub mod devices;
pub mod hub;
pub mod monitors;
pub mod orchestrator;
pub mod persistence;
pub mod platform;
pub mod shutdown;
pub mod util;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One reading of the host's vital signs.
///
/// Every field a probe could not read is `None`; a missing field never
/// invalidates the rest of the sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: Option<f32>,
    pub throttling: Option<ThrottleState>,
    pub disk: Option<DiskSpace>,
    pub memory_used_percent: Option<f32>,
    pub load_1m_percent: Option<f32>,
}

impl HealthSample {
    /// A sample where every probe came back empty.
    pub fn unavailable() -> Self {
        Self {
            timestamp: Utc::now(),
            temperature_c: None,
            throttling: None,
            disk: None,
            memory_used_percent: None,
            load_1m_percent: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleState {
    pub active: bool,
    pub reasons: BTreeSet<ThrottleReason>,
}

/// Why the firmware is holding the CPU back.
///
/// The declaration order is the reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThrottleReason {
    UnderVoltage,
    #[serde(rename = "frequency-capped")]
    FreqCapped,
    #[serde(rename = "temperature-limit")]
    TempLimited,
}

impl ThrottleReason {
    pub fn label(&self) -> &'static str {
        match self {
            ThrottleReason::UnderVoltage => "under-voltage",
            ThrottleReason::FreqCapped => "frequency-capped",
            ThrottleReason::TempLimited => "temperature-limit",
        }
    }
}

impl std::fmt::Display for ThrottleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

const UNDER_VOLTAGE_NOW: u32 = 1 << 0;
const FREQ_CAPPED_NOW: u32 = 1 << 1;
const THROTTLED_NOW: u32 = 1 << 2;
const SOFT_TEMP_LIMIT_NOW: u32 = 1 << 3;

impl ThrottleState {
    /// Decode the firmware's `get_throttled` bit field.
    ///
    /// Only the "currently" bits (0-3) count; the sticky "has occurred" bits
    /// (16-19) describe the past and are ignored.
    pub fn from_bits(bits: u32) -> Self {
        let mut reasons = BTreeSet::new();
        if bits & UNDER_VOLTAGE_NOW != 0 {
            reasons.insert(ThrottleReason::UnderVoltage);
        }
        if bits & FREQ_CAPPED_NOW != 0 {
            reasons.insert(ThrottleReason::FreqCapped);
        }
        if bits & SOFT_TEMP_LIMIT_NOW != 0 {
            reasons.insert(ThrottleReason::TempLimited);
        }

        let current = UNDER_VOLTAGE_NOW | FREQ_CAPPED_NOW | THROTTLED_NOW | SOFT_TEMP_LIMIT_NOW;

        Self {
            active: bits & current != 0,
            reasons,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskSpace {
    pub available_mb: u64,
    pub used_percent: f32,
}
