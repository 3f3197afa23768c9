use std::sync::Arc;

use acoustic_station::{
    actors::health::HealthMonitorHandle,
    api::{ApiConfig, ApiState, spawn_api_server},
    config::{StationConfig, read_config_file},
    devices::{DeviceKind, tty::TtyDriver},
    hub::BroadcastHub,
    monitors::probe::SystemProbe,
    orchestrator::DeviceOrchestrator,
    persistence::TracingSink,
    platform::PlatformDetector,
    shutdown::{ShutdownCoordinator, ShutdownOutcome, SignalListener},
    util,
};
use clap::Parser;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults are used when omitted)
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let level = util::get_log_level()
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::DEBUG);

    let filter = filter::Targets::new().with_targets(vec![
        ("acoustic_station", level),
        ("station_hub", level),
        ("persistence", LevelFilter::INFO),
        ("tower_http", LevelFilter::INFO),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => StationConfig::default(),
    };

    let profile = PlatformDetector::new(&config.platform).resolve().clone();
    let hub = BroadcastHub::new(config.broadcast_capacity, profile.max_clients);

    let measurement = Arc::new(TtyDriver::new(
        DeviceKind::Measurement,
        &config.devices.measurement,
    ));
    let position = Arc::new(TtyDriver::new(
        DeviceKind::Position,
        &config.devices.position,
    ));
    let orchestrator = DeviceOrchestrator::spawn(
        &config.devices,
        measurement,
        position,
        hub.clone(),
        Arc::new(TracingSink),
    );

    let health = HealthMonitorHandle::spawn(
        profile.clone(),
        Arc::new(SystemProbe::default()),
        hub.clone(),
    );

    let api_state = ApiState::new(orchestrator.clone(), health.clone(), hub.clone(), profile);
    let addr = spawn_api_server(ApiConfig::from_settings(&config.api), api_state).await?;
    info!("observers can connect at ws://{addr}/api/v1/stream");

    {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.connect_on_start().await });
    }

    let coordinator = ShutdownCoordinator::new(hub, health, orchestrator);
    let mut signals = SignalListener::install()?;

    loop {
        let signal = signals.next().await;
        let coordinator = coordinator.clone();
        // the listener keeps running so a second signal is seen (and ignored)
        tokio::spawn(async move {
            if let Some(outcome) = coordinator.shutdown(signal).await {
                if let ShutdownOutcome::Failed(failures) = &outcome {
                    error!("shutdown finished with {} teardown failure(s)", failures.len());
                }
                std::process::exit(outcome.exit_code());
            }
        });
    }
}
