use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use super::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Service status ("ok" when everything is available, "degraded" otherwise)
    pub status: String,
    /// API version
    pub version: String,
    /// Whether the dashboard table exists
    pub dashboard_data: bool,
    /// Whether the forecast pipeline was set up
    pub forecaster: bool,
}

/// Health check endpoint.
///
/// Returns "degraded" (still 200) when the dashboard table is missing or the
/// forecaster could not be set up.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
    )
)]
pub(crate) async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let dashboard_data = state.config.dashboard_data_path.is_file();
    let forecaster = state.forecaster.is_ok();

    Json(HealthResponse {
        status: if dashboard_data && forecaster {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        dashboard_data,
        forecaster,
    })
}
