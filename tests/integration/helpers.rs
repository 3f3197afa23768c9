//! Helper functions for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acoustic_station::actors::messages::{DeviceSample, StationEvent};
use acoustic_station::config::{DeviceConfig, DevicesConfig};
use acoustic_station::devices::{
    DeviceDriver, DriverError, DriverEvent, PositionDriver, ScanCandidate,
};
use acoustic_station::hub::Subscription;
use acoustic_station::monitors::probe::HealthProbe;
use acoustic_station::persistence::PersistenceSink;
use acoustic_station::{DiskSpace, ThrottleState};
use async_trait::async_trait;
use tokio::sync::{Semaphore, broadcast};

/// Scripted serial driver.
///
/// Connects succeed on the requested port unless an outcome was queued with
/// [`MockDriver::push_outcome`]. With [`MockDriver::hold_connects`] every
/// connect waits for [`MockDriver::release_connects`], and with
/// [`MockDriver::hang_teardown`] every disconnect waits forever.
pub struct MockDriver {
    candidates: Mutex<Vec<ScanCandidate>>,
    outcomes: Mutex<VecDeque<Result<String, DriverError>>>,
    held: AtomicBool,
    gate: Semaphore,
    teardown_error: Mutex<Option<DriverError>>,
    teardown_hangs: AtomicBool,
    busy: AtomicBool,
    logging: AtomicBool,
    events: broadcast::Sender<DriverEvent>,
    scan_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            candidates: Mutex::new(Vec::new()),
            outcomes: Mutex::new(VecDeque::new()),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
            teardown_error: Mutex::new(None),
            teardown_hangs: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            logging: AtomicBool::new(false),
            events,
            scan_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        })
    }

    /// Driver whose scan identifies exactly these ports, in order.
    pub fn identifying(ports: &[&str]) -> Arc<Self> {
        let driver = Self::new();
        driver.set_candidates(
            ports
                .iter()
                .map(|port| candidate(port, true, None))
                .collect(),
        );
        driver
    }

    pub fn set_candidates(&self, candidates: Vec<ScanCandidate>) {
        *self.candidates.lock().unwrap() = candidates;
    }

    pub fn push_outcome(&self, outcome: Result<String, DriverError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn hold_connects(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release_connects(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn fail_teardown(&self, error: DriverError) {
        *self.teardown_error.lock().unwrap() = Some(error);
    }

    pub fn hang_teardown(&self) {
        self.teardown_hangs.store(true, Ordering::SeqCst);
    }

    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn set_logging(&self, active: bool) {
        self.logging.store(active, Ordering::SeqCst);
    }

    pub fn emit(&self, event: DriverEvent) {
        self.events.send(event).unwrap();
    }

    pub fn logging_active(&self) -> bool {
        self.logging.load(Ordering::SeqCst)
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub async fn wait_for_connect_calls(&self, n: usize) {
        wait_until(|| self.connect_calls() >= n).await;
    }
}

#[async_trait]
impl DeviceDriver for MockDriver {
    async fn scan(&self) -> Result<Vec<ScanCandidate>, DriverError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.lock().unwrap().clone())
    }

    async fn connect(&self, port: &str) -> Result<String, DriverError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        if self.held.load(Ordering::SeqCst) {
            self.gate.acquire().await.unwrap().forget();
        }

        let scripted = self.outcomes.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(port.to_string()))
    }

    async fn disconnect(&self) -> Result<(), DriverError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.teardown_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.logging.store(false, Ordering::SeqCst);

        match self.teardown_error.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl PositionDriver for MockDriver {
    fn is_logging_active(&self) -> bool {
        self.logging.load(Ordering::SeqCst)
    }

    async fn start_logging(&self) -> Result<(), DriverError> {
        self.logging.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_logging(&self) -> Result<(), DriverError> {
        self.logging.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub fn candidate(port: &str, identified: bool, info: Option<&str>) -> ScanCandidate {
    ScanCandidate {
        port: port.to_string(),
        identified,
        info: info.map(str::to_string),
    }
}

/// Health probe returning whatever the test last set.
#[derive(Default)]
pub struct MockProbe {
    pub temperature: Mutex<Option<f32>>,
    pub throttling: Mutex<Option<ThrottleState>>,
    pub disk: Mutex<Option<DiskSpace>>,
    pub memory: Mutex<Option<f32>>,
    pub load: Mutex<Option<f32>>,
}

impl MockProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_temperature(&self, value: Option<f32>) {
        *self.temperature.lock().unwrap() = value;
    }

    pub fn set_throttling(&self, value: Option<ThrottleState>) {
        *self.throttling.lock().unwrap() = value;
    }

    pub fn set_disk(&self, available_mb: u64, used_percent: f32) {
        *self.disk.lock().unwrap() = Some(DiskSpace {
            available_mb,
            used_percent,
        });
    }
}

#[async_trait]
impl HealthProbe for MockProbe {
    async fn read_temperature(&self) -> Option<f32> {
        *self.temperature.lock().unwrap()
    }

    async fn read_throttle_state(&self) -> Option<ThrottleState> {
        self.throttling.lock().unwrap().clone()
    }

    async fn read_disk_space(&self) -> Option<DiskSpace> {
        *self.disk.lock().unwrap()
    }

    async fn read_memory(&self) -> Option<f32> {
        *self.memory.lock().unwrap()
    }

    async fn read_load(&self) -> Option<f32> {
        *self.load.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    samples: Mutex<Vec<DeviceSample>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn samples(&self) -> Vec<DeviceSample> {
        self.samples.lock().unwrap().clone()
    }
}

impl PersistenceSink for RecordingSink {
    fn append(&self, sample: &DeviceSample) {
        self.samples.lock().unwrap().push(sample.clone());
    }
}

/// Device settings with timers far in the future and short supervision timeouts.
pub fn test_device_config() -> DeviceConfig {
    DeviceConfig {
        ports: Vec::new(),
        connect_on_start: false,
        auto_reconnect: true,
        max_retries: 3,
        reconnect_interval_secs: 3600,
        connect_timeout_ms: 2_000,
        disconnect_timeout_ms: 500,
        auto_start_logging: false,
        logging_start_delay_ms: 10,
        ..DeviceConfig::measurement()
    }
}

pub fn test_devices_config() -> DevicesConfig {
    DevicesConfig {
        measurement: test_device_config(),
        position: test_device_config(),
    }
}

const WAIT: Duration = Duration::from_secs(3);

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Next event on `subscription` matching `predicate`; earlier events are discarded.
pub async fn next_matching(
    subscription: &mut Subscription,
    predicate: impl Fn(&StationEvent) -> bool,
) -> StationEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = subscription.recv().await.expect("hub closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event not received in time")
}

/// Everything that arrives within a short quiet period.
pub async fn drain(subscription: &mut Subscription) -> Vec<StationEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(100), subscription.recv()).await
    {
        events.push(event);
    }
    events
}
