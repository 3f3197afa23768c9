//! Orderly shutdown on SIGINT/SIGTERM.
//!
//! `Running → ShuttingDown → Terminated`, entered at most once. Later signals
//! are ignored while the first shutdown is still running.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{error, info, warn};

use crate::actors::health::HealthMonitorHandle;
use crate::devices::{DeviceError, DeviceKind};
use crate::hub::BroadcastHub;
use crate::orchestrator::DeviceOrchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownPhase {
    Running = 0,
    ShuttingDown = 1,
    Terminated = 2,
}

impl ShutdownPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShutdownPhase::Running,
            1 => ShutdownPhase::ShuttingDown,
            _ => ShutdownPhase::Terminated,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl std::fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationSignal::Interrupt => f.write_str("SIGINT"),
            TerminationSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownOutcome {
    Clean,
    Failed(Vec<(DeviceKind, DeviceError)>),
}

impl ShutdownOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownOutcome::Clean => 0,
            ShutdownOutcome::Failed(_) => 1,
        }
    }
}

#[derive(Clone)]
pub struct ShutdownCoordinator {
    phase: Arc<AtomicU8>,
    hub: BroadcastHub,
    health: HealthMonitorHandle,
    orchestrator: DeviceOrchestrator,
}

impl ShutdownCoordinator {
    pub fn new(
        hub: BroadcastHub,
        health: HealthMonitorHandle,
        orchestrator: DeviceOrchestrator,
    ) -> Self {
        Self {
            phase: Arc::new(AtomicU8::new(ShutdownPhase::Running as u8)),
            hub,
            health,
            orchestrator,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Run the shutdown sequence.
    ///
    /// Returns `None` if a shutdown was already started by an earlier signal.
    pub async fn shutdown(&self, signal: TerminationSignal) -> Option<ShutdownOutcome> {
        if self
            .phase
            .compare_exchange(
                ShutdownPhase::Running as u8,
                ShutdownPhase::ShuttingDown as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            info!("received {signal} while already shutting down, ignoring");
            return None;
        }

        info!("received {signal}, shutting down");

        self.hub.close();
        self.orchestrator.stop_timers().await;
        if let Err(e) = self.health.shutdown().await {
            warn!("health monitor already stopped: {e:#}");
        }

        let mut failures = Vec::new();
        for (kind, result) in self.orchestrator.disconnect_all().await {
            match result {
                Ok(()) => info!("{kind} disconnected"),
                Err(e) => {
                    error!("{kind} did not disconnect cleanly: {e}");
                    failures.push((kind, e));
                }
            }
        }

        self.orchestrator.shutdown().await;
        self.phase
            .store(ShutdownPhase::Terminated as u8, Ordering::SeqCst);

        let outcome = if failures.is_empty() {
            ShutdownOutcome::Clean
        } else {
            ShutdownOutcome::Failed(failures)
        };
        info!("shutdown complete: {outcome:?}");

        Some(outcome)
    }
}

/// Waits for SIGINT (ctrl-c) or, on unix, SIGTERM. Can be awaited repeatedly.
pub struct SignalListener {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl SignalListener {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?,
        })
    }

    pub async fn next(&mut self) -> TerminationSignal {
        #[cfg(unix)]
        {
            tokio::select! {
                Ok(()) = tokio::signal::ctrl_c() => TerminationSignal::Interrupt,
                _ = self.terminate.recv() => TerminationSignal::Terminate,
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("cannot listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
            TerminationSignal::Interrupt
        }
    }
}
