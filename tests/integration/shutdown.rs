//! Shutdown coordination tests

use std::sync::Arc;
use std::time::Duration;

use acoustic_station::actors::health::HealthMonitorHandle;
use acoustic_station::config::ProfileOverrides;
use acoustic_station::devices::{DeviceError, DeviceKind, DriverError};
use acoustic_station::hub::BroadcastHub;
use acoustic_station::orchestrator::DeviceOrchestrator;
use acoustic_station::platform::{PlatformProfile, Tier};
use acoustic_station::shutdown::{
    ShutdownCoordinator, ShutdownOutcome, ShutdownPhase, TerminationSignal,
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::helpers::*;

struct Station {
    coordinator: ShutdownCoordinator,
    orchestrator: DeviceOrchestrator,
    health: HealthMonitorHandle,
    hub: BroadcastHub,
    measurement: Arc<MockDriver>,
    position: Arc<MockDriver>,
}

async fn connected_station() -> Station {
    let measurement = MockDriver::identifying(&["/dev/xl2"]);
    let position = MockDriver::identifying(&["/dev/gps"]);
    let hub = BroadcastHub::new(64, 8);

    let orchestrator = DeviceOrchestrator::spawn(
        &test_devices_config(),
        measurement.clone(),
        position.clone(),
        hub.clone(),
        RecordingSink::new(),
    );
    let profile = PlatformProfile::for_tier(Tier::Pi5).with_overrides(&ProfileOverrides {
        monitoring_interval_ms: Some(3_600_000),
        ..ProfileOverrides::default()
    });
    let health = HealthMonitorHandle::spawn(profile, MockProbe::new(), hub.clone());

    orchestrator.connect(DeviceKind::Measurement, None).await.unwrap();
    orchestrator.connect(DeviceKind::Position, None).await.unwrap();

    Station {
        coordinator: ShutdownCoordinator::new(hub.clone(), health.clone(), orchestrator.clone()),
        orchestrator,
        health,
        hub,
        measurement,
        position,
    }
}

#[tokio::test]
async fn test_clean_shutdown() {
    let station = connected_station().await;
    assert_eq!(station.coordinator.phase(), ShutdownPhase::Running);

    let outcome = station
        .coordinator
        .shutdown(TerminationSignal::Terminate)
        .await;

    assert_eq!(outcome, Some(ShutdownOutcome::Clean));
    assert_eq!(outcome.unwrap().exit_code(), 0);
    assert_eq!(station.coordinator.phase(), ShutdownPhase::Terminated);
    assert_eq!(station.measurement.disconnect_calls(), 1);
    assert_eq!(station.position.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_teardown_failure_is_reported_but_does_not_stop_shutdown() {
    let station = connected_station().await;
    station
        .position
        .fail_teardown(DriverError::Io("receiver not responding".to_string()));

    let outcome = station
        .coordinator
        .shutdown(TerminationSignal::Interrupt)
        .await
        .unwrap();

    assert_matches!(
        &outcome,
        ShutdownOutcome::Failed(failures)
            if matches!(failures.as_slice(), [(DeviceKind::Position, DeviceError::TeardownFailed(_))])
    );
    assert_eq!(outcome.exit_code(), 1);

    // the other device was still released
    assert_eq!(station.measurement.disconnect_calls(), 1);
    assert_eq!(station.position.disconnect_calls(), 1);
    assert_eq!(station.coordinator.phase(), ShutdownPhase::Terminated);
}

#[tokio::test]
async fn test_hanging_teardown_fails_shutdown_after_timeout() {
    let station = connected_station().await;
    station.measurement.hang_teardown();

    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        station.coordinator.shutdown(TerminationSignal::Terminate),
    )
    .await
    .expect("shutdown waited on a hung port")
    .unwrap();

    assert_matches!(
        &outcome,
        ShutdownOutcome::Failed(failures)
            if matches!(failures.as_slice(), [(DeviceKind::Measurement, DeviceError::TeardownFailed(_))])
    );
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(station.position.disconnect_calls(), 1);
    assert_eq!(station.coordinator.phase(), ShutdownPhase::Terminated);
}

#[tokio::test]
async fn test_shutdown_closes_hub_and_stops_actors() {
    let station = connected_station().await;

    station
        .coordinator
        .shutdown(TerminationSignal::Terminate)
        .await
        .unwrap();

    assert!(!station.hub.is_accepting());
    assert!(station.hub.subscribe("late").is_err());

    // give the actors a moment to drop their receivers
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        station.orchestrator.device_status(DeviceKind::Measurement).await,
        Err(DeviceError::ActorUnavailable)
    );
    assert!(station.health.sample_now().await.is_err());
}

#[tokio::test]
async fn test_second_signal_is_ignored() {
    let station = connected_station().await;

    assert!(station
        .coordinator
        .shutdown(TerminationSignal::Interrupt)
        .await
        .is_some());
    assert_eq!(
        station
            .coordinator
            .shutdown(TerminationSignal::Interrupt)
            .await,
        None
    );
    assert_eq!(station.measurement.disconnect_calls(), 1);
}

#[tokio::test]
async fn test_concurrent_signals_run_one_shutdown() {
    let station = connected_station().await;

    let first = station.coordinator.clone();
    let second = station.coordinator.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.shutdown(TerminationSignal::Interrupt).await }),
        tokio::spawn(async move { second.shutdown(TerminationSignal::Terminate).await }),
    );

    let outcomes = [a.unwrap(), b.unwrap()];
    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_some()).count(), 1);
    assert_eq!(station.position.disconnect_calls(), 1);
}
