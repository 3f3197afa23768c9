//! Device status and explicit connection control

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use tracing::info;

use crate::actors::messages::DeviceHandle;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::ApiState;
use crate::api::types::{ConnectRequest, ConnectResponse};
use crate::devices::DeviceKind;

fn parse_kind(kind: &str) -> ApiResult<DeviceKind> {
    kind.parse().map_err(ApiError::NotFound)
}

fn parse_connect_request(body: &[u8]) -> ApiResult<ConnectRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ConnectRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid connect request: {e}")))
}

/// GET /api/v1/devices/:kind
pub async fn get_device(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<DeviceHandle>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.orchestrator.device_status(kind).await?))
}

/// POST /api/v1/devices/:kind/connect
///
/// The body is optional; without a port the device is discovered by scanning.
/// A body that is present has to decode.
pub async fn connect_device(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    body: Bytes,
) -> ApiResult<Json<ConnectResponse>> {
    let kind = parse_kind(&kind)?;
    let request = parse_connect_request(&body)?;
    if request.port.as_deref().is_some_and(|port| port.trim().is_empty()) {
        return Err(ApiError::InvalidRequest("port must not be empty".to_string()));
    }

    info!("connect requested for {kind} (port {:?})", request.port);
    let port = state.orchestrator.connect(kind, request.port).await?;

    Ok(Json(ConnectResponse { port }))
}

/// POST /api/v1/devices/:kind/disconnect
pub async fn disconnect_device(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<DeviceHandle>> {
    let kind = parse_kind(&kind)?;

    info!("disconnect requested for {kind}");
    state.orchestrator.disconnect(kind).await?;

    Ok(Json(state.orchestrator.device_status(kind).await?))
}
