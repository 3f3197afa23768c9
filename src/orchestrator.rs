//! The two serial peripherals behind one façade.
//!
//! Each device is its own [`DeviceActor`](crate::actors::device::DeviceActor);
//! the orchestrator wires them to their drivers, to the hub and, for the
//! measurement device, to the persistence sink gated on the position device's
//! logging session.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::actors::device::{DeviceController, DeviceExtras, PersistenceGate};
use crate::actors::messages::{DeviceHandle, StationEvent, TickOutcome};
use crate::config::DevicesConfig;
use crate::devices::{DeviceDriver, DeviceError, DeviceKind, PositionDriver};
use crate::hub::BroadcastHub;
use crate::persistence::PersistenceSink;

#[derive(Clone)]
pub struct DeviceOrchestrator {
    measurement: DeviceController,
    position: DeviceController,
    position_driver: Arc<dyn PositionDriver>,
    config: DevicesConfig,
    hub: BroadcastHub,
}

impl DeviceOrchestrator {
    pub fn spawn<M, P>(
        config: &DevicesConfig,
        measurement: Arc<M>,
        position: Arc<P>,
        hub: BroadcastHub,
        sink: Arc<dyn PersistenceSink>,
    ) -> Self
    where
        M: DeviceDriver + 'static,
        P: PositionDriver + 'static,
    {
        let position_driver: Arc<dyn PositionDriver> = position.clone();

        let measurement = DeviceController::spawn_with(
            DeviceKind::Measurement,
            measurement,
            config.measurement.clone(),
            hub.clone(),
            DeviceExtras {
                persistence: Some(PersistenceGate {
                    position: position_driver.clone(),
                    sink,
                }),
                auto_logging: None,
            },
        );

        let auto_logging = config
            .position
            .auto_start_logging
            .then(|| position_driver.clone());
        let position = DeviceController::spawn_with(
            DeviceKind::Position,
            position,
            config.position.clone(),
            hub.clone(),
            DeviceExtras {
                persistence: None,
                auto_logging,
            },
        );

        Self {
            measurement,
            position,
            position_driver,
            config: config.clone(),
            hub,
        }
    }

    pub fn device(&self, kind: DeviceKind) -> &DeviceController {
        match kind {
            DeviceKind::Measurement => &self.measurement,
            DeviceKind::Position => &self.position,
        }
    }

    pub async fn connect(
        &self,
        kind: DeviceKind,
        port: Option<String>,
    ) -> Result<String, DeviceError> {
        self.device(kind).connect(port).await
    }

    pub async fn disconnect(&self, kind: DeviceKind) -> Result<(), DeviceError> {
        self.device(kind).disconnect().await
    }

    pub async fn device_status(&self, kind: DeviceKind) -> Result<DeviceHandle, DeviceError> {
        self.device(kind).status().await
    }

    pub async fn reconnect_tick(&self, kind: DeviceKind) -> Result<TickOutcome, DeviceError> {
        self.device(kind).reconnect_tick().await
    }

    /// Connect every device whose configuration asks for it, concurrently.
    ///
    /// Failures are left to the reconnection timer.
    pub async fn connect_on_start(&self) {
        let measurement = async {
            if self.config.measurement.connect_on_start {
                Some(self.measurement.connect(None).await)
            } else {
                None
            }
        };
        let position = async {
            if self.config.position.connect_on_start {
                Some(self.position.connect(None).await)
            } else {
                None
            }
        };

        let (measurement, position) = tokio::join!(measurement, position);
        for (kind, result) in [
            (DeviceKind::Measurement, measurement),
            (DeviceKind::Position, position),
        ] {
            match result {
                Some(Ok(port)) => info!("{kind} connected on {port} at start-up"),
                Some(Err(e)) if e.is_retryable() => {
                    info!("{kind} not connected at start-up, leaving it to reconnection: {e}")
                }
                Some(Err(e)) => warn!("{kind} not connected at start-up: {e}"),
                None => debug!("{kind} connect on start disabled"),
            }
        }
    }

    /// Disconnect both devices concurrently and wait for both.
    pub async fn disconnect_all(&self) -> Vec<(DeviceKind, Result<(), DeviceError>)> {
        let (measurement, position) =
            tokio::join!(self.measurement.disconnect(), self.position.disconnect());
        vec![
            (DeviceKind::Measurement, measurement),
            (DeviceKind::Position, position),
        ]
    }

    pub async fn stop_timers(&self) {
        let (measurement, position) =
            tokio::join!(self.measurement.stop_timers(), self.position.stop_timers());
        for result in [measurement, position] {
            if let Err(e) = result {
                debug!("could not stop timers: {e}");
            }
        }
    }

    pub fn is_logging_active(&self) -> bool {
        self.position_driver.is_logging_active()
    }

    pub async fn start_logging(&self) -> Result<(), DeviceError> {
        self.position_driver
            .start_logging()
            .await
            .map_err(|e| DeviceError::Logging(e.to_string()))
            .inspect_err(|e| warn!("could not start logging: {e}"))?;

        info!("position logging started");
        self.hub.emit(StationEvent::LoggingStarted {
            kind: DeviceKind::Position,
        });
        Ok(())
    }

    pub async fn stop_logging(&self) -> Result<(), DeviceError> {
        self.position_driver
            .stop_logging()
            .await
            .map_err(|e| DeviceError::Logging(e.to_string()))?;

        info!("position logging stopped");
        self.hub.emit(StationEvent::LoggingStopped {
            kind: DeviceKind::Position,
        });
        Ok(())
    }

    pub async fn shutdown(&self) {
        let (measurement, position) =
            tokio::join!(self.measurement.shutdown(), self.position.shutdown());
        for result in [measurement, position] {
            if let Err(e) = result {
                debug!("device actor already gone: {e}");
            }
        }
    }
}
