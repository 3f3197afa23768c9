//! API shared state containing actor handles

use crate::actors::health::HealthMonitorHandle;
use crate::hub::BroadcastHub;
use crate::orchestrator::DeviceOrchestrator;
use crate::platform::PlatformProfile;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: DeviceOrchestrator,

    pub health: HealthMonitorHandle,

    /// Observers subscribe here for the websocket stream
    pub hub: BroadcastHub,

    pub profile: PlatformProfile,
}

impl ApiState {
    pub fn new(
        orchestrator: DeviceOrchestrator,
        health: HealthMonitorHandle,
        hub: BroadcastHub,
        profile: PlatformProfile,
    ) -> Self {
        Self {
            orchestrator,
            health,
            hub,
            profile,
        }
    }
}
