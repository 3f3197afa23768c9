use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::trace;

/// Top-level station configuration.
///
/// Every field has a default, so `{}` is a complete configuration.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct StationConfig {
    #[serde(default)]
    pub platform: PlatformConfig,

    #[serde(default)]
    pub devices: DevicesConfig,

    /// Events buffered per observer before a slow observer starts lagging
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    #[serde(default)]
    pub api: ApiSettings,
}

fn default_broadcast_capacity() -> usize {
    256
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PlatformConfig {
    /// File whose contents identify the board revision
    #[serde(default = "default_signature_path")]
    pub signature_path: PathBuf,

    /// Per-field replacements for the tier table
    #[serde(default)]
    pub overrides: ProfileOverrides,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            signature_path: default_signature_path(),
            overrides: ProfileOverrides::default(),
        }
    }
}

fn default_signature_path() -> PathBuf {
    PathBuf::from("/proc/cpuinfo")
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct ProfileOverrides {
    pub max_temperature_warning_c: Option<f32>,
    pub max_temperature_critical_c: Option<f32>,
    pub min_disk_space_mb: Option<u64>,
    pub max_clients: Option<usize>,
    pub monitoring_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct DevicesConfig {
    #[serde(default = "DeviceConfig::measurement")]
    pub measurement: DeviceConfig,

    #[serde(default = "DeviceConfig::position")]
    pub position: DeviceConfig,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            measurement: DeviceConfig::measurement(),
            position: DeviceConfig::position(),
        }
    }
}

/// Connection policy for one serial peripheral
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DeviceConfig {
    /// Candidate ports, tried in order during a scan
    #[serde(default)]
    pub ports: Vec<String>,

    /// Optional query/answer pair used to identify the device on a port
    #[serde(default)]
    pub identify: Option<IdentifyConfig>,

    /// Try to connect once right after start-up
    #[serde(default = "default_true")]
    pub connect_on_start: bool,

    #[serde(default = "default_true")]
    pub auto_reconnect: bool,

    /// Consecutive failed automatic attempts before the reconnection timer gives up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout_ms: u64,

    /// Start a logging session after every successful connect (position device only)
    #[serde(default)]
    pub auto_start_logging: bool,

    #[serde(default = "default_logging_start_delay")]
    pub logging_start_delay_ms: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct IdentifyConfig {
    /// Written verbatim to the port, line ending included
    pub query: String,

    /// Substring the first reply line must contain
    pub expect: String,

    #[serde(default = "default_identify_timeout")]
    pub timeout_ms: u64,
}

impl DeviceConfig {
    pub fn measurement() -> Self {
        Self {
            ports: vec![
                "/dev/xl2".to_string(),
                "/dev/ttyUSB0".to_string(),
                "/dev/ttyACM0".to_string(),
                "/dev/ttyAMA0".to_string(),
            ],
            ..Self::base()
        }
    }

    pub fn position() -> Self {
        Self {
            ports: vec![
                "/dev/gps".to_string(),
                "/dev/ttyUSB1".to_string(),
                "/dev/ttyUSB2".to_string(),
                "/dev/ttyACM1".to_string(),
            ],
            reconnect_interval_secs: 45,
            ..Self::base()
        }
    }

    fn base() -> Self {
        Self {
            ports: Vec::new(),
            identify: None,
            connect_on_start: true,
            auto_reconnect: true,
            max_retries: default_max_retries(),
            reconnect_interval_secs: default_reconnect_interval(),
            connect_timeout_ms: default_connect_timeout(),
            disconnect_timeout_ms: default_disconnect_timeout(),
            auto_start_logging: false,
            logging_start_delay_ms: default_logging_start_delay(),
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn logging_start_delay(&self) -> Duration {
        Duration::from_millis(self.logging_start_delay_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    10
}

fn default_reconnect_interval() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    15_000
}

fn default_disconnect_timeout() -> u64 {
    5_000
}

fn default_logging_start_delay() -> u64 {
    1_000
}

fn default_identify_timeout() -> u64 {
    500
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ApiSettings {
    /// Falls back to `STATION_ADDR`/`STATION_PORT` when absent
    pub bind: Option<SocketAddr>,

    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            bind: None,
            enable_cors: true,
        }
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<StationConfig> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .context("invalid configuration file provided")
        .inspect(|config| trace!("loaded config: {config:?}"))
}
