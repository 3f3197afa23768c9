//! Platform profile and latest health sample

use axum::Json;
use axum::extract::State;

use crate::api::error::ApiResult;
use crate::api::state::ApiState;
use crate::api::types::SystemResponse;

/// GET /api/v1/system
pub async fn get_system(State(state): State<ApiState>) -> ApiResult<Json<SystemResponse>> {
    let last_sample = state.health.last_sample().await?;

    Ok(Json(SystemResponse {
        profile: state.profile.clone(),
        last_sample,
    }))
}
