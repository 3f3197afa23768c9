//! Serial peripherals and the driver contracts the orchestrator consumes.
//!
//! Drivers do the wire-level work (scanning, handshakes, reading frames); the
//! device actors in [`crate::actors::device`] decide *when* that work happens.

pub mod error;
pub mod tty;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use error::{DeviceError, DriverError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Measurement,
    Position,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Measurement => "measurement",
            DeviceKind::Position => "position",
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "measurement" => Ok(DeviceKind::Measurement),
            "position" => Ok(DeviceKind::Position),
            other => Err(format!("unknown device kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ConnectionState::Scanning | ConnectionState::Connecting)
    }
}

/// One port reported by a discovery scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCandidate {
    pub port: String,
    pub identified: bool,
    pub info: Option<String>,
}

/// Something a driver observed on its own, outside of any request.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    Sample(serde_json::Value),
    /// The link on `port` went away; the driver has already dropped its session.
    ConnectionLost { port: String, reason: String },
}

/// Contract of a serial device driver.
///
/// `connect` returns the port actually opened. Drivers publish samples and
/// unexpected link loss on the channel returned by `subscribe`.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    async fn scan(&self) -> Result<Vec<ScanCandidate>, DriverError>;

    async fn connect(&self, port: &str) -> Result<String, DriverError>;

    async fn disconnect(&self) -> Result<(), DriverError>;

    /// True while the driver itself is mid-handshake.
    fn is_busy(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent>;
}

/// The position receiver additionally owns the logging session.
#[async_trait]
pub trait PositionDriver: DeviceDriver {
    fn is_logging_active(&self) -> bool;

    async fn start_logging(&self) -> Result<(), DriverError>;

    async fn stop_logging(&self) -> Result<(), DriverError>;
}
