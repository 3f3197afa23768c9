use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::actors::messages::SystemWarning;
use crate::platform::PlatformProfile;
use crate::{HealthSample, ThrottleReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureStatus {
    Normal,
    Warning,
    Critical,
    Unknown,
}

impl TemperatureStatus {
    pub fn evaluate(temperature: Option<f32>, warning: f32, critical: f32) -> TemperatureStatus {
        let Some(temperature) = temperature else {
            return TemperatureStatus::Unknown;
        };

        if temperature >= critical {
            return TemperatureStatus::Critical;
        }

        if temperature >= warning {
            return TemperatureStatus::Warning;
        }

        TemperatureStatus::Normal
    }

    pub fn for_profile(temperature: Option<f32>, profile: &PlatformProfile) -> TemperatureStatus {
        Self::evaluate(
            temperature,
            profile.max_temperature_warning_c,
            profile.max_temperature_critical_c,
        )
    }
}

/// Classify one sample.
///
/// Produces at most one warning per condition, always in the order
/// temperature, throttling, disk. There is no memory between calls: a
/// condition that persists warns again on the next sample.
pub fn evaluate(sample: &HealthSample, profile: &PlatformProfile) -> Vec<SystemWarning> {
    let mut warnings = Vec::new();

    let status = TemperatureStatus::for_profile(sample.temperature_c, profile);
    if let (Some(value), TemperatureStatus::Warning | TemperatureStatus::Critical) =
        (sample.temperature_c, status)
    {
        let threshold = if status == TemperatureStatus::Critical {
            profile.max_temperature_critical_c
        } else {
            profile.max_temperature_warning_c
        };
        warnings.push(SystemWarning::Temperature {
            value,
            threshold,
            status,
            tier: profile.tier,
        });
    }

    let throttled = sample
        .throttling
        .as_ref()
        .filter(|throttling| throttling.active && !throttling.reasons.is_empty());
    if let Some(throttling) = throttled {
        let reasons: Vec<ThrottleReason> = throttling.reasons.iter().copied().collect();
        let labels: Vec<&str> = reasons.iter().map(ThrottleReason::label).collect();
        warnings.push(SystemWarning::Throttling {
            message: format!("CPU throttling: {}", labels.join(", ")),
            reasons,
            tier: profile.tier,
        });
    }

    let low_disk = sample
        .disk
        .as_ref()
        .filter(|disk| disk.available_mb < profile.min_disk_space_mb);
    if let Some(disk) = low_disk {
        warnings.push(SystemWarning::DiskSpace {
            available_mb: disk.available_mb,
            threshold_mb: profile.min_disk_space_mb,
            used_percent: disk.used_percent,
        });
    }

    trace!("{} warning(s) for sample at {}", warnings.len(), sample.timestamp);

    warnings
}
