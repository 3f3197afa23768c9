//! HealthMonitorActor - Samples host vital signs on the platform's cadence
//!
//! ```text
//! Timer tick → gather (probe) → classify (thresholds) → system-warning* + system-performance
//!     ↑
//!     └─── Commands (SampleNow, GetLastSample, Shutdown)
//! ```
//!
//! Every reader is a fault boundary: it runs in its own task and gets at most
//! one monitoring interval, so a hung or panicking reader costs only its own
//! field and the next tick still runs.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use crate::HealthSample;
use crate::hub::BroadcastHub;
use crate::monitors::probe::{self, HealthProbe};
use crate::monitors::thresholds::{self, TemperatureStatus};
use crate::platform::PlatformProfile;

use super::messages::{HealthCommand, HealthReport, PerformanceReport, StationEvent};

pub struct HealthMonitorActor {
    profile: PlatformProfile,
    probe: Arc<dyn HealthProbe>,
    hub: BroadcastHub,
    command_rx: mpsc::Receiver<HealthCommand>,
    last_sample: Option<HealthSample>,
    started_at: Instant,
}

impl HealthMonitorActor {
    pub fn new(
        profile: PlatformProfile,
        probe: Arc<dyn HealthProbe>,
        hub: BroadcastHub,
        command_rx: mpsc::Receiver<HealthCommand>,
    ) -> Self {
        Self {
            profile,
            probe,
            hub,
            command_rx,
            last_sample: None,
            started_at: Instant::now(),
        }
    }

    #[instrument(skip(self), fields(tier = %self.profile.tier))]
    pub async fn run(mut self) {
        debug!(
            "starting health monitor every {}ms",
            self.profile.monitoring_interval_ms
        );

        let mut ticker = interval(self.profile.monitoring_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        HealthCommand::SampleNow { respond_to } => {
                            debug!("received SampleNow command");
                            let report = self.tick().await;
                            let _ = respond_to.send(report);
                        }

                        HealthCommand::GetLastSample { respond_to } => {
                            let _ = respond_to.send(self.last_sample.clone());
                        }

                        HealthCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("health monitor stopped");
    }

    async fn tick(&mut self) -> HealthReport {
        let sample =
            probe::gather(self.probe.clone(), self.profile.monitoring_interval()).await;

        let warnings = thresholds::evaluate(&sample, &self.profile);
        for warning in &warnings {
            warn!("system warning: {warning:?}");
            self.hub.emit(StationEvent::SystemWarning(warning.clone()));
        }

        let report = PerformanceReport {
            sample: sample.clone(),
            temperature_status: TemperatureStatus::for_profile(sample.temperature_c, &self.profile),
            connected_observers: self.hub.observer_count(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            tier: self.profile.tier,
        };
        trace!("performance: {report:?}");
        self.hub.emit(StationEvent::SystemPerformance(report));

        self.last_sample = Some(sample.clone());

        HealthReport { sample, warnings }
    }
}

/// Handle for controlling a HealthMonitorActor
#[derive(Clone)]
pub struct HealthMonitorHandle {
    sender: mpsc::Sender<HealthCommand>,
}

impl HealthMonitorHandle {
    pub fn spawn(profile: PlatformProfile, probe: Arc<dyn HealthProbe>, hub: BroadcastHub) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = HealthMonitorActor::new(profile, probe, hub, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Sample immediately, bypassing the interval timer.
    pub async fn sample_now(&self) -> Result<HealthReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::SampleNow { respond_to: tx })
            .await
            .context("failed to send SampleNow command")?;

        rx.await.context("failed to receive health report")
    }

    pub async fn last_sample(&self) -> Result<Option<HealthSample>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HealthCommand::GetLastSample { respond_to: tx })
            .await
            .context("failed to send GetLastSample command")?;

        rx.await.context("failed to receive last sample")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(HealthCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
