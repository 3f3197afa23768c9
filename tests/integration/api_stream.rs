//! HTTP endpoints and the observer websocket
//!
//! Every test binds its own server on a random local port.

use std::net::SocketAddr;
use std::sync::Arc;

use acoustic_station::actors::health::HealthMonitorHandle;
use acoustic_station::actors::messages::StationEvent;
use acoustic_station::api::{ApiConfig, ApiState, ConnectResponse, HealthResponse, spawn_api_server};
use acoustic_station::config::ProfileOverrides;
use acoustic_station::devices::DeviceKind;
use acoustic_station::hub::BroadcastHub;
use acoustic_station::orchestrator::DeviceOrchestrator;
use acoustic_station::platform::{PlatformProfile, Tier};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::helpers::*;

struct TestApi {
    addr: SocketAddr,
    hub: BroadcastHub,
    position: Arc<MockDriver>,
}

async fn spawn_test_api(max_observers: usize) -> TestApi {
    let measurement = MockDriver::identifying(&["/dev/xl2"]);
    let position = MockDriver::identifying(&["/dev/gps"]);
    let hub = BroadcastHub::new(64, max_observers);

    let orchestrator = DeviceOrchestrator::spawn(
        &test_devices_config(),
        measurement,
        position.clone(),
        hub.clone(),
        RecordingSink::new(),
    );
    let profile = PlatformProfile::for_tier(Tier::Pi3).with_overrides(&ProfileOverrides {
        monitoring_interval_ms: Some(3_600_000),
        ..ProfileOverrides::default()
    });
    let health = HealthMonitorHandle::spawn(profile.clone(), MockProbe::new(), hub.clone());

    let state = ApiState::new(orchestrator, health, hub.clone(), profile);
    let config = ApiConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        enable_cors: false,
    };

    let addr = spawn_api_server(config, state).await.unwrap();

    TestApi {
        addr,
        hub,
        position,
    }
}

fn close_code(message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>) -> u16 {
    match message {
        Some(Ok(Message::Close(Some(frame)))) => u16::from(frame.code),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let api = spawn_test_api(4).await;

    let response = reqwest::get(format!("http://{}/api/v1/health", api.addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: HealthResponse = response.json().await.unwrap();
    assert_eq!(body.status, "ok");
    assert!(body.accepting_observers);
    assert_eq!(body.connected_observers, 0);
}

#[tokio::test]
async fn test_system_endpoint_reports_profile() {
    let api = spawn_test_api(4).await;

    let body: Value = reqwest::get(format!("http://{}/api/v1/system", api.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["profile"]["tier"], "pi3");
    assert_eq!(body["profile"]["max_clients"], 5);
}

#[tokio::test]
async fn test_device_status_and_unknown_kind() {
    let api = spawn_test_api(4).await;

    let response = reqwest::get(format!("http://{}/api/v1/devices/measurement", api.addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "measurement");
    assert_eq!(body["state"], "idle");
    assert_eq!(body["retry_count"], 0);

    let response = reqwest::get(format!("http://{}/api/v1/devices/weather", api.addr))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connect_and_disconnect_over_http() {
    let api = spawn_test_api(4).await;
    let client = reqwest::Client::new();

    // no body: discover by scanning
    let response = client
        .post(format!("http://{}/api/v1/devices/position/connect", api.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: ConnectResponse = response.json().await.unwrap();
    assert_eq!(body.port, "/dev/gps");
    assert_eq!(api.position.scan_calls(), 1);

    let response = client
        .post(format!("http://{}/api/v1/devices/position/connect", api.addr))
        .json(&serde_json::json!({ "port": "/dev/ttyAMA0" }))
        .send()
        .await
        .unwrap();
    let body: ConnectResponse = response.json().await.unwrap();
    assert_eq!(body.port, "/dev/ttyAMA0");

    let response = client
        .post(format!("http://{}/api/v1/devices/position/disconnect", api.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["state"], "idle");
    assert_eq!(body["active_port"], Value::Null);
}

#[tokio::test]
async fn test_failed_connect_is_bad_gateway() {
    let api = spawn_test_api(4).await;
    api.position.set_candidates(Vec::new());

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/devices/position/connect", api.addr))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("no position device"));
}

#[tokio::test]
async fn test_stream_delivers_events() {
    let api = spawn_test_api(4).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/api/v1/stream", api.addr))
        .await
        .unwrap();

    let Some(Ok(Message::Text(first))) = socket.next().await else {
        panic!("expected a text frame");
    };
    let first: StationEvent = serde_json::from_str(&first).unwrap();
    assert_eq!(first, StationEvent::ObserverCount { count: 1 });

    api.hub.emit(StationEvent::LoggingStarted {
        kind: DeviceKind::Position,
    });

    let Some(Ok(Message::Text(text))) = socket.next().await else {
        panic!("expected a text frame");
    };
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        value,
        serde_json::json!({ "event": "logging-started", "data": { "kind": "position" } })
    );
}

#[tokio::test]
async fn test_stream_rejects_observer_over_limit() {
    let api = spawn_test_api(1).await;
    let url = format!("ws://{}/api/v1/stream", api.addr);

    let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    // the first observer is registered once its count arrives
    assert!(matches!(first.next().await, Some(Ok(Message::Text(_)))));

    let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    assert_eq!(close_code(second.next().await), 1013);
    assert_eq!(api.hub.observer_count(), 1);
}

#[tokio::test]
async fn test_stream_closed_on_shutdown() {
    let api = spawn_test_api(4).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/api/v1/stream", api.addr))
        .await
        .unwrap();
    assert!(matches!(socket.next().await, Some(Ok(Message::Text(_)))));

    api.hub.close();

    assert_eq!(close_code(socket.next().await), 1001);
}

#[tokio::test]
async fn test_empty_port_is_rejected() {
    let api = spawn_test_api(4).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/devices/measurement/connect", api.addr))
        .json(&serde_json::json!({ "port": "  " }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_connect_body_is_rejected() {
    let api = spawn_test_api(4).await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/api/v1/devices/position/connect", api.addr))
        .header("content-type", "application/json")
        .body("{\"port\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    // no silent fallback to discovery
    assert_eq!(api.position.scan_calls(), 0);
    assert_eq!(api.position.connect_calls(), 0);
}
