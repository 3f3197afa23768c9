//! DeviceActor - Owns the connection state of one serial peripheral
//!
//! The actor is the only place a device's [`ConnectionState`] changes. It never
//! awaits the driver itself: scans, handshakes and teardowns run in spawned
//! tasks that report back on an internal progress channel, tagged with the
//! [`AttemptId`] they were started for. A report whose token no longer matches
//! the actor's current attempt is stale and dropped, so a late completion can
//! never overwrite newer state.
//!
//! ## Message Flow
//!
//! ```text
//! connect()/tick ──► start_attempt ──spawn──► scan → connect ──► Progress::AttemptFinished
//!                         ▲                                               │
//!                         └──────── waiters coalesce here ◄───────────────┘
//!
//! driver events ──► DeviceSample / ConnectionLost ──► BroadcastHub (+ PersistenceSink)
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::DeviceConfig;
use crate::devices::{
    ConnectionState, DeviceDriver, DeviceError, DeviceKind, DriverError, DriverEvent,
    PositionDriver,
};
use crate::hub::BroadcastHub;
use crate::persistence::PersistenceSink;

use super::messages::{
    AttemptId, DeviceCommand, DeviceHandle, DeviceSample, SkipReason, StationEvent, TickOutcome,
};

/// Forward measurement samples to a sink while the position device is logging.
#[derive(Clone)]
pub struct PersistenceGate {
    pub position: Arc<dyn PositionDriver>,
    pub sink: Arc<dyn PersistenceSink>,
}

/// Optional wiring beyond the plain driver.
#[derive(Clone, Default)]
pub struct DeviceExtras {
    pub persistence: Option<PersistenceGate>,

    /// Start a logging session on this driver after every successful connect
    pub auto_logging: Option<Arc<dyn PositionDriver>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Explicit,
    Automatic,
}

enum Waiter {
    Connect(oneshot::Sender<Result<String, DeviceError>>),
    Tick(oneshot::Sender<TickOutcome>),
}

impl Waiter {
    fn resolve(self, result: &Result<String, DeviceError>) {
        match self {
            Waiter::Connect(tx) => {
                let _ = tx.send(result.clone());
            }
            Waiter::Tick(tx) => {
                let _ = tx.send(TickOutcome::Attempted(result.clone()));
            }
        }
    }
}

struct Attempt {
    id: AttemptId,
    origin: Origin,
    waiters: Vec<Waiter>,
    task: JoinHandle<()>,
}

impl Attempt {
    fn cancel(self) -> JoinHandle<()> {
        let cancelled = Err(DeviceError::Cancelled);
        for waiter in self.waiters {
            waiter.resolve(&cancelled);
        }
        self.task
    }
}

/// Connect requests that arrived while a teardown was running.
struct QueuedConnect {
    port: Option<String>,
    waiters: Vec<Waiter>,
}

struct Teardown {
    token: AttemptId,
    was_connected: bool,
    waiters: Vec<oneshot::Sender<Result<(), DeviceError>>>,
    then_connect: Option<QueuedConnect>,
}

struct Connection {
    port: String,
    info: Option<String>,
}

enum Progress {
    Candidate {
        attempt: AttemptId,
        port: String,
        others: Vec<String>,
    },
    AttemptFinished {
        attempt: AttemptId,
        result: Result<Connection, DeviceError>,
    },
    TeardownFinished {
        token: AttemptId,
        result: Result<(), DeviceError>,
    },
    LoggingDue {
        attempt: AttemptId,
    },
}

pub struct DeviceActor {
    kind: DeviceKind,
    driver: Arc<dyn DeviceDriver>,
    settings: DeviceConfig,
    hub: BroadcastHub,
    extras: DeviceExtras,

    command_rx: mpsc::Receiver<DeviceCommand>,
    progress_tx: mpsc::UnboundedSender<Progress>,
    progress_rx: mpsc::UnboundedReceiver<Progress>,
    driver_events: broadcast::Receiver<DriverEvent>,
    driver_events_open: bool,

    state: ConnectionState,
    active_port: Option<String>,
    retry_count: u32,
    last_error: Option<String>,
    auto_reconnect: bool,
    timers_enabled: bool,

    next_token: u64,
    attempt: Option<Attempt>,
    teardown: Option<Teardown>,
    /// Attempt that produced the current connection
    connected_by: Option<AttemptId>,
}

impl DeviceActor {
    fn new(
        kind: DeviceKind,
        driver: Arc<dyn DeviceDriver>,
        settings: DeviceConfig,
        hub: BroadcastHub,
        extras: DeviceExtras,
        command_rx: mpsc::Receiver<DeviceCommand>,
    ) -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        // subscribe before the actor runs so no early sample is missed
        let driver_events = driver.subscribe();
        let auto_reconnect = settings.auto_reconnect;

        Self {
            kind,
            driver,
            settings,
            hub,
            extras,
            command_rx,
            progress_tx,
            progress_rx,
            driver_events,
            driver_events_open: true,
            state: ConnectionState::Idle,
            active_port: None,
            retry_count: 0,
            last_error: None,
            auto_reconnect,
            timers_enabled: true,
            next_token: 0,
            attempt: None,
            teardown: None,
            connected_by: None,
        }
    }

    #[instrument(skip(self), fields(device = %self.kind))]
    pub async fn run(mut self) {
        debug!("starting device actor");

        let period = self.settings.reconnect_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        debug!("command channel closed, shutting down");
                        break;
                    };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }

                Some(progress) = self.progress_rx.recv() => {
                    self.handle_progress(progress);
                }

                event = self.driver_events.recv(), if self.driver_events_open => {
                    self.handle_driver_event(event);
                }

                _ = ticker.tick(), if self.timers_enabled => {
                    self.auto_reconnect_tick(None);
                }
            }
        }

        debug!("device actor stopped");
    }

    /// Returns `false` when the actor should stop.
    fn handle_command(&mut self, cmd: DeviceCommand) -> bool {
        match cmd {
            DeviceCommand::Connect { port, respond_to } => {
                self.connect(port, Waiter::Connect(respond_to));
            }
            DeviceCommand::Disconnect { respond_to } => {
                self.disconnect(respond_to);
            }
            DeviceCommand::GetStatus { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            DeviceCommand::ReconnectTick { respond_to } => {
                self.auto_reconnect_tick(Some(respond_to));
            }
            DeviceCommand::SetAutoReconnect { enabled } => {
                debug!("auto reconnect set to {enabled}");
                self.auto_reconnect = enabled;
            }
            DeviceCommand::StopTimers => {
                debug!("stopping timers");
                self.timers_enabled = false;
            }
            DeviceCommand::Shutdown => {
                debug!("received shutdown command");
                return false;
            }
        }
        true
    }

    fn snapshot(&self) -> DeviceHandle {
        DeviceHandle {
            kind: self.kind,
            state: self.state,
            active_port: self.active_port.clone(),
            in_flight_attempt_id: self.attempt.as_ref().map(|attempt| attempt.id),
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
            auto_reconnect: self.auto_reconnect,
        }
    }

    fn next_token(&mut self) -> AttemptId {
        self.next_token = self.next_token.wrapping_add(1);
        AttemptId(self.next_token)
    }

    fn connect(&mut self, port: Option<String>, waiter: Waiter) {
        match self.state {
            ConnectionState::Connected => {
                match self.active_port.clone() {
                    Some(active) if port.is_none() || port.as_deref() == Some(active.as_str()) => {
                        trace!("already connected on {active}");
                        waiter.resolve(&Ok(active));
                    }
                    _ => {
                        info!(
                            "switching from {:?} to {port:?}, reconnecting",
                            self.active_port
                        );
                        self.begin_teardown(
                            Vec::new(),
                            Some(QueuedConnect {
                                port,
                                waiters: vec![waiter],
                            }),
                        );
                    }
                }
            }

            ConnectionState::Scanning | ConnectionState::Connecting => {
                if let Some(attempt) = self.attempt.as_mut() {
                    trace!("joining in-flight attempt {}", attempt.id);
                    attempt.waiters.push(waiter);
                }
            }

            ConnectionState::Disconnecting => {
                if let Some(teardown) = self.teardown.as_mut() {
                    let queued = teardown.then_connect.get_or_insert_with(|| QueuedConnect {
                        port: None,
                        waiters: Vec::new(),
                    });
                    if port.is_some() {
                        queued.port = port;
                    }
                    queued.waiters.push(waiter);
                }
            }

            ConnectionState::Idle => {
                self.start_attempt(port, Origin::Explicit, vec![waiter]);
            }
        }
    }

    fn start_attempt(&mut self, port: Option<String>, origin: Origin, waiters: Vec<Waiter>) {
        let id = self.next_token();
        self.state = if port.is_some() {
            ConnectionState::Connecting
        } else {
            ConnectionState::Scanning
        };
        debug!("starting attempt {id} ({:?}, port {port:?})", origin);

        let kind = self.kind;
        let driver = self.driver.clone();
        let progress = self.progress_tx.clone();
        let limit = self.settings.connect_timeout();

        let task = tokio::spawn(async move {
            let result =
                match tokio::time::timeout(limit, run_attempt(kind, driver, port, id, &progress))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(DeviceError::ConnectFailed(format!(
                        "no connection within {}ms",
                        limit.as_millis()
                    ))),
                };
            let _ = progress.send(Progress::AttemptFinished {
                attempt: id,
                result,
            });
        });

        self.attempt = Some(Attempt {
            id,
            origin,
            waiters,
            task,
        });
    }

    fn disconnect(&mut self, respond_to: oneshot::Sender<Result<(), DeviceError>>) {
        match self.state {
            ConnectionState::Idle => {
                trace!("already disconnected");
                let _ = respond_to.send(Ok(()));
            }
            ConnectionState::Disconnecting => {
                if let Some(teardown) = self.teardown.as_mut() {
                    teardown.waiters.push(respond_to);
                    if let Some(queued) = teardown.then_connect.take() {
                        let cancelled = Err(DeviceError::Cancelled);
                        for waiter in queued.waiters {
                            waiter.resolve(&cancelled);
                        }
                    }
                }
            }
            ConnectionState::Scanning
            | ConnectionState::Connecting
            | ConnectionState::Connected => {
                self.begin_teardown(vec![respond_to], None);
            }
        }
    }

    fn begin_teardown(
        &mut self,
        waiters: Vec<oneshot::Sender<Result<(), DeviceError>>>,
        then_connect: Option<QueuedConnect>,
    ) {
        let was_connected = self.state == ConnectionState::Connected;
        let pending = self.attempt.take().map(Attempt::cancel);
        if pending.is_some() {
            debug!("cancelled in-flight attempt");
        }

        let token = self.next_token();
        self.state = ConnectionState::Disconnecting;
        self.connected_by = None;
        self.teardown = Some(Teardown {
            token,
            was_connected,
            waiters,
            then_connect,
        });

        let driver = self.driver.clone();
        let progress = self.progress_tx.clone();
        let limit = self.settings.disconnect_timeout();

        tokio::spawn(async move {
            // let a cancelled attempt settle so it cannot reopen the port behind us
            if let Some(pending) = pending {
                let _ = pending.await;
            }

            let result = match tokio::time::timeout(limit, driver.disconnect()).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(DeviceError::TeardownFailed(e.to_string())),
                Err(_) => Err(DeviceError::TeardownFailed(format!(
                    "port not released within {}ms",
                    limit.as_millis()
                ))),
            };
            let _ = progress.send(Progress::TeardownFinished { token, result });
        });
    }

    fn auto_reconnect_tick(&mut self, respond_to: Option<oneshot::Sender<TickOutcome>>) {
        let skip = if !self.auto_reconnect {
            Some(SkipReason::Disabled)
        } else {
            match self.state {
                ConnectionState::Scanning | ConnectionState::Connecting => {
                    Some(SkipReason::InFlight)
                }
                ConnectionState::Connected => Some(SkipReason::Connected),
                ConnectionState::Disconnecting => Some(SkipReason::Disconnecting),
                ConnectionState::Idle if self.retry_count >= self.settings.max_retries => {
                    Some(SkipReason::RetryLimitReached)
                }
                ConnectionState::Idle => None,
            }
        };

        if let Some(reason) = skip {
            trace!("reconnect tick skipped: {reason:?}");
            if let Some(tx) = respond_to {
                let _ = tx.send(TickOutcome::Skipped(reason));
            }
            return;
        }

        info!(
            "reconnection attempt {}/{}",
            self.retry_count + 1,
            self.settings.max_retries
        );
        let waiters = respond_to.map(Waiter::Tick).into_iter().collect();
        self.start_attempt(None, Origin::Automatic, waiters);
    }

    fn handle_progress(&mut self, progress: Progress) {
        match progress {
            Progress::Candidate {
                attempt,
                port,
                others,
            } => self.on_candidate(attempt, port, others),
            Progress::AttemptFinished { attempt, result } => {
                self.on_attempt_finished(attempt, result)
            }
            Progress::TeardownFinished { token, result } => {
                self.on_teardown_finished(token, result)
            }
            Progress::LoggingDue { attempt } => self.on_logging_due(attempt),
        }
    }

    fn is_current(&self, attempt: AttemptId) -> bool {
        self.attempt.as_ref().is_some_and(|current| current.id == attempt)
    }

    fn on_candidate(&mut self, attempt: AttemptId, port: String, others: Vec<String>) {
        if !self.is_current(attempt) {
            debug!("ignoring candidate from stale attempt {attempt}");
            return;
        }
        debug!("selected {port}");
        if !others.is_empty() {
            info!(
                "other {} devices available but not used: {}",
                self.kind,
                others.join(", ")
            );
        }
        self.state = ConnectionState::Connecting;
    }

    fn on_attempt_finished(&mut self, attempt: AttemptId, result: Result<Connection, DeviceError>) {
        let Some(current) = self.attempt.take_if(|current| current.id == attempt) else {
            debug!("ignoring stale completion of attempt {attempt}");
            return;
        };

        let outcome = match result {
            Ok(Connection { port, info }) => {
                self.state = ConnectionState::Connected;
                self.active_port = Some(port.clone());
                self.retry_count = 0;
                self.last_error = None;
                self.connected_by = Some(attempt);

                info!("connected on {port}");
                self.hub.emit(StationEvent::DeviceConnected {
                    kind: self.kind,
                    port: port.clone(),
                    info,
                });
                self.schedule_logging(attempt);

                Ok(port)
            }
            Err(e) => {
                self.state = ConnectionState::Idle;
                self.active_port = None;
                self.last_error = Some(e.to_string());

                if current.origin == Origin::Automatic {
                    self.retry_count = self.retry_count.saturating_add(1);
                    if self.retry_count >= self.settings.max_retries {
                        info!(
                            "giving up automatic reconnection after {} failed attempts",
                            self.retry_count
                        );
                    }
                }

                match &e {
                    DeviceError::NoCandidateFound { .. } | DeviceError::ScanFailed(_) => {
                        info!("{e}")
                    }
                    _ => warn!("{e}"),
                }

                self.hub.emit(StationEvent::DeviceDisconnected {
                    kind: self.kind,
                    reason: Some(e.to_string()),
                });

                Err(e)
            }
        };

        for waiter in current.waiters {
            waiter.resolve(&outcome);
        }
    }

    fn on_teardown_finished(&mut self, token: AttemptId, result: Result<(), DeviceError>) {
        let Some(teardown) = self.teardown.take_if(|teardown| teardown.token == token) else {
            debug!("ignoring stale teardown {token}");
            return;
        };

        self.state = ConnectionState::Idle;
        self.active_port = None;

        let reason = match &result {
            Ok(()) => {
                debug!("teardown complete");
                "disconnected on request".to_string()
            }
            Err(e) => {
                warn!("{e}, treating device as disconnected");
                self.last_error = Some(e.to_string());
                e.to_string()
            }
        };

        if teardown.was_connected {
            self.hub.emit(StationEvent::DeviceDisconnected {
                kind: self.kind,
                reason: Some(reason),
            });
        }

        for waiter in teardown.waiters {
            let _ = waiter.send(result.clone());
        }

        if let Some(queued) = teardown.then_connect {
            self.start_attempt(queued.port, Origin::Explicit, queued.waiters);
        }
    }

    fn schedule_logging(&self, attempt: AttemptId) {
        if self.extras.auto_logging.is_none() || !self.timers_enabled {
            return;
        }

        let delay = self.settings.logging_start_delay();
        let progress = self.progress_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = progress.send(Progress::LoggingDue { attempt });
        });
    }

    fn on_logging_due(&mut self, attempt: AttemptId) {
        if self.connected_by != Some(attempt) || !self.timers_enabled {
            debug!("connection changed before logging start, skipping");
            return;
        }
        let Some(position) = self.extras.auto_logging.clone() else {
            return;
        };

        let hub = self.hub.clone();
        let kind = self.kind;
        tokio::spawn(async move {
            match position.start_logging().await {
                Ok(()) => {
                    info!("{kind} logging started");
                    hub.emit(StationEvent::LoggingStarted { kind });
                }
                Err(e) => warn!("could not start {kind} logging: {e}"),
            }
        });
    }

    fn handle_driver_event(&mut self, event: Result<DriverEvent, RecvError>) {
        match event {
            Ok(DriverEvent::Sample(payload)) => {
                let sample = DeviceSample {
                    kind: self.kind,
                    timestamp: Utc::now(),
                    payload,
                };

                let gate = self
                    .extras
                    .persistence
                    .as_ref()
                    .filter(|gate| gate.position.is_logging_active());
                if let Some(gate) = gate {
                    gate.sink.append(&sample);
                }

                self.hub.emit(StationEvent::DeviceSample(sample));
            }

            Ok(DriverEvent::ConnectionLost { port, reason }) => {
                if self.state != ConnectionState::Connected {
                    debug!("link loss reported while {:?}: {reason}", self.state);
                    return;
                }
                if self.active_port.as_deref() != Some(port.as_str()) {
                    debug!("ignoring loss of {port}, connected on {:?}", self.active_port);
                    return;
                }

                warn!("connection lost: {reason}");
                self.state = ConnectionState::Idle;
                self.active_port = None;
                self.connected_by = None;
                self.last_error = Some(reason.clone());
                self.hub.emit(StationEvent::DeviceDisconnected {
                    kind: self.kind,
                    reason: Some(reason),
                });
            }

            Err(RecvError::Lagged(skipped)) => {
                warn!("device actor lagged behind driver, skipped {skipped} events");
            }

            Err(RecvError::Closed) => {
                debug!("driver event channel closed");
                self.driver_events_open = false;
            }
        }
    }
}

async fn run_attempt(
    kind: DeviceKind,
    driver: Arc<dyn DeviceDriver>,
    port: Option<String>,
    attempt: AttemptId,
    progress: &mpsc::UnboundedSender<Progress>,
) -> Result<Connection, DeviceError> {
    let (port, info) = match port {
        Some(port) => (port, None),
        None => {
            let candidates = driver
                .scan()
                .await
                .map_err(|e| DeviceError::ScanFailed(e.to_string()))?;
            let scanned = candidates.len();

            let mut identified = candidates.into_iter().filter(|candidate| candidate.identified);
            let Some(first) = identified.next() else {
                return Err(DeviceError::NoCandidateFound { kind, scanned });
            };
            let others = identified.map(|candidate| candidate.port).collect();

            let _ = progress.send(Progress::Candidate {
                attempt,
                port: first.port.clone(),
                others,
            });
            (first.port, first.info)
        }
    };

    if driver.is_busy() {
        return Err(DeviceError::DriverBusy);
    }

    let port = driver.connect(&port).await.map_err(|e| match e {
        DriverError::Busy => DeviceError::DriverBusy,
        other => DeviceError::ConnectFailed(other.to_string()),
    })?;

    Ok(Connection { port, info })
}

/// Handle for controlling a DeviceActor
///
/// Cheap to clone; every clone talks to the same actor.
#[derive(Clone)]
pub struct DeviceController {
    sender: mpsc::Sender<DeviceCommand>,
    kind: DeviceKind,
}

impl DeviceController {
    pub fn spawn(
        kind: DeviceKind,
        driver: Arc<dyn DeviceDriver>,
        settings: DeviceConfig,
        hub: BroadcastHub,
    ) -> Self {
        Self::spawn_with(kind, driver, settings, hub, DeviceExtras::default())
    }

    pub fn spawn_with(
        kind: DeviceKind,
        driver: Arc<dyn DeviceDriver>,
        settings: DeviceConfig,
        hub: BroadcastHub,
        extras: DeviceExtras,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = DeviceActor::new(kind, driver, settings, hub, extras, cmd_rx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            kind,
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Connect, or join the attempt already in flight.
    ///
    /// Without a port the driver scans and the first identified candidate wins.
    pub async fn connect(&self, port: Option<String>) -> Result<String, DeviceError> {
        let (tx, rx) = oneshot::channel();
        self.send(DeviceCommand::Connect {
            port,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| DeviceError::ActorUnavailable)?
    }

    /// Tear the connection down. The device always ends up idle; a failed
    /// teardown is reported but not retried.
    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        let (tx, rx) = oneshot::channel();
        self.send(DeviceCommand::Disconnect { respond_to: tx })
            .await?;
        rx.await.map_err(|_| DeviceError::ActorUnavailable)?
    }

    pub async fn status(&self) -> Result<DeviceHandle, DeviceError> {
        let (tx, rx) = oneshot::channel();
        self.send(DeviceCommand::GetStatus { respond_to: tx })
            .await?;
        rx.await.map_err(|_| DeviceError::ActorUnavailable)
    }

    /// Run one reconnection tick now, bypassing the interval timer.
    pub async fn reconnect_tick(&self) -> Result<TickOutcome, DeviceError> {
        let (tx, rx) = oneshot::channel();
        self.send(DeviceCommand::ReconnectTick { respond_to: tx })
            .await?;
        rx.await.map_err(|_| DeviceError::ActorUnavailable)
    }

    pub async fn set_auto_reconnect(&self, enabled: bool) -> Result<(), DeviceError> {
        self.send(DeviceCommand::SetAutoReconnect { enabled }).await
    }

    pub async fn stop_timers(&self) -> Result<(), DeviceError> {
        self.send(DeviceCommand::StopTimers).await
    }

    pub async fn shutdown(&self) -> Result<(), DeviceError> {
        self.send(DeviceCommand::Shutdown).await
    }

    async fn send(&self, cmd: DeviceCommand) -> Result<(), DeviceError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| DeviceError::ActorUnavailable)
    }
}
