//! Request and response bodies of the HTTP endpoints

use serde::{Deserialize, Serialize};

use crate::HealthSample;
use crate::platform::PlatformProfile;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub accepting_observers: bool,
    pub connected_observers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemResponse {
    pub profile: PlatformProfile,
    pub last_sample: Option<HealthSample>,
}

/// Body of `POST /api/v1/devices/:kind/connect`; an absent port means "scan"
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConnectRequest {
    #[serde(default)]
    pub port: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectResponse {
    pub port: String,
}
