//! Message types for actor communication
//!
//! Commands travel over each actor's mpsc channel; events are published once to
//! the [`BroadcastHub`](crate::hub::BroadcastHub) and fanned out to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::devices::{ConnectionState, DeviceError, DeviceKind};
use crate::monitors::thresholds::TemperatureStatus;
use crate::platform::Tier;
use crate::{HealthSample, ThrottleReason};

/// Everything observers can receive.
///
/// Serialized as `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum StationEvent {
    DeviceConnected {
        kind: DeviceKind,
        port: String,
        info: Option<String>,
    },
    DeviceDisconnected {
        kind: DeviceKind,
        reason: Option<String>,
    },
    DeviceSample(DeviceSample),
    SystemWarning(SystemWarning),
    SystemPerformance(PerformanceReport),
    ObserverCount {
        count: usize,
    },
    LoggingStarted {
        kind: DeviceKind,
    },
    LoggingStopped {
        kind: DeviceKind,
    },
}

impl StationEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StationEvent::DeviceConnected { .. } => "device-connected",
            StationEvent::DeviceDisconnected { .. } => "device-disconnected",
            StationEvent::DeviceSample(_) => "device-sample",
            StationEvent::SystemWarning(_) => "system-warning",
            StationEvent::SystemPerformance(_) => "system-performance",
            StationEvent::ObserverCount { .. } => "observer-count",
            StationEvent::LoggingStarted { .. } => "logging-started",
            StationEvent::LoggingStopped { .. } => "logging-stopped",
        }
    }
}

/// A raw reading forwarded from a device driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSample {
    pub kind: DeviceKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemWarning {
    Temperature {
        value: f32,
        threshold: f32,
        status: TemperatureStatus,
        tier: Tier,
    },
    Throttling {
        message: String,
        reasons: Vec<ThrottleReason>,
        tier: Tier,
    },
    DiskSpace {
        available_mb: u64,
        threshold_mb: u64,
        used_percent: f32,
    },
}

/// The condition a warning is about; at most one warning per condition per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningCondition {
    Temperature,
    Throttling,
    DiskSpace,
}

impl SystemWarning {
    pub fn condition(&self) -> WarningCondition {
        match self {
            SystemWarning::Temperature { .. } => WarningCondition::Temperature,
            SystemWarning::Throttling { .. } => WarningCondition::Throttling,
            SystemWarning::DiskSpace { .. } => WarningCondition::DiskSpace,
        }
    }
}

/// Periodic telemetry published on every health tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    #[serde(flatten)]
    pub sample: HealthSample,
    pub temperature_status: TemperatureStatus,
    pub connected_observers: usize,
    pub uptime_secs: u64,
    pub tier: Tier,
}

/// Result of one health tick.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub sample: HealthSample,
    pub warnings: Vec<SystemWarning>,
}

/// Opaque token identifying one connection attempt or teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub u64);

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read-only snapshot of one device's connection bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHandle {
    pub kind: DeviceKind,
    pub state: ConnectionState,
    pub active_port: Option<String>,
    pub in_flight_attempt_id: Option<AttemptId>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub auto_reconnect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    InFlight,
    Connected,
    Disconnecting,
    RetryLimitReached,
}

/// What a reconnection tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Skipped(SkipReason),
    Attempted(Result<String, DeviceError>),
}

/// Commands that can be sent to a device actor
#[derive(Debug)]
pub enum DeviceCommand {
    Connect {
        port: Option<String>,
        respond_to: oneshot::Sender<Result<String, DeviceError>>,
    },

    Disconnect {
        respond_to: oneshot::Sender<Result<(), DeviceError>>,
    },

    GetStatus {
        respond_to: oneshot::Sender<DeviceHandle>,
    },

    /// Run one reconnection tick now and report what it did once it settles
    ReconnectTick {
        respond_to: oneshot::Sender<TickOutcome>,
    },

    SetAutoReconnect {
        enabled: bool,
    },

    /// Stop the reconnection timer and any pending logging start
    StopTimers,

    Shutdown,
}

/// Commands that can be sent to the health monitor
#[derive(Debug)]
pub enum HealthCommand {
    /// Sample immediately, bypassing the interval timer
    SampleNow {
        respond_to: oneshot::Sender<HealthReport>,
    },

    GetLastSample {
        respond_to: oneshot::Sender<Option<HealthSample>>,
    },

    Shutdown,
}
