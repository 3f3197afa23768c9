//! Health check endpoint

use axum::Json;
use axum::extract::State;

use crate::api::state::ApiState;
use crate::api::types::HealthResponse;

/// GET /api/v1/health
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        accepting_observers: state.hub.is_accepting(),
        connected_observers: state.hub.observer_count(),
    })
}
