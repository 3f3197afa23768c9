use thiserror::Error;

use super::DeviceKind;

/// Failure reported by a driver collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("port {port} unavailable: {reason}")]
    PortUnavailable { port: String, reason: String },

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("driver is busy with another handshake")]
    Busy,

    #[error("not connected")]
    NotConnected,

    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        DriverError::Io(e.to_string())
    }
}

/// Outcome of an orchestrator-level operation on one device.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("no {kind} device identified among {scanned} candidate port(s)")]
    NoCandidateFound { kind: DeviceKind, scanned: usize },

    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("driver is busy with another handshake")]
    DriverBusy,

    #[error("teardown failed: {0}")]
    TeardownFailed(String),

    #[error("logging session: {0}")]
    Logging(String),

    #[error("attempt cancelled by disconnect")]
    Cancelled,

    #[error("device actor is not running")]
    ActorUnavailable,
}

impl DeviceError {
    /// Failures the reconnection tick may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeviceError::NoCandidateFound { .. }
                | DeviceError::ScanFailed(_)
                | DeviceError::ConnectFailed(_)
                | DeviceError::DriverBusy
        )
    }
}
