//! HTTP and WebSocket surface for observers
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Liveness, phase and observer count
//! - `GET /api/v1/system` - Platform profile and last health sample
//! - `GET /api/v1/devices/:kind` - Connection snapshot of one device
//! - `POST /api/v1/devices/:kind/connect` - Explicit connect (optional `{"port": ...}`)
//! - `POST /api/v1/devices/:kind/disconnect` - Explicit disconnect
//! - `WS /api/v1/stream` - Every station event as `{"event", "data"}`

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod types;
#[cfg(feature = "api")]
pub mod websocket;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::ApiState;
#[cfg(feature = "api")]
pub use types::{ConnectRequest, ConnectResponse, HealthResponse, SystemResponse};

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::info;

use crate::config::ApiSettings;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:3000")
    pub bind_addr: SocketAddr,

    /// Enable CORS for browser dashboards
    pub enable_cors: bool,
}

impl ApiConfig {
    /// Bind address from the configuration file, else from `STATION_ADDR`/`STATION_PORT`.
    pub fn from_settings(settings: &ApiSettings) -> Self {
        Self {
            bind_addr: settings.bind.unwrap_or_else(crate::util::get_bind_addr),
            enable_cors: settings.enable_cors,
        }
    }
}

#[cfg(feature = "api")]
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/system", get(routes::system::get_system))
        .route("/api/v1/devices/:kind", get(routes::devices::get_device))
        .route(
            "/api/v1/devices/:kind/connect",
            post(routes::devices::connect_device),
        )
        .route(
            "/api/v1/devices/:kind/disconnect",
            post(routes::devices::disconnect_device),
        )
        .route("/api/v1/stream", get(websocket::websocket_handler))
        .with_state(state)
}

/// Spawn the API server
///
/// Serves until the hub is closed by the shutdown coordinator.
/// Returns the server's local address.
#[cfg(feature = "api")]
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    use anyhow::Context;
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    info!("starting API server on {}", config.bind_addr);

    let hub = state.hub.clone();
    let mut app = router(state).layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            hub.closed().await;
            info!("API server no longer accepting connections");
        });
        if let Err(e) = server.await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
