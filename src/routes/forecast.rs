//! GET /api/v1/forecast: run one forecast cycle.

use axum::extract::State;
use axum::Json;

use super::AppState;
use crate::errors::{AppError, ErrorResponse};
use crate::services::forecast::ForecastReport;

/// Forecast the target pollutant for the next hour.
///
/// Reads the history, fetches the live IQAir reading and applies the model.
/// Nothing is cached between calls.
#[utoipa::path(
    get,
    path = "/api/v1/forecast",
    tag = "Forecast",
    responses(
        (status = 200, description = "One-hour-ahead forecast", body = ForecastReport),
        (status = 500, description = "Feature schema or model failure", body = ErrorResponse),
        (status = 502, description = "Live reading unavailable", body = ErrorResponse),
        (status = 503, description = "History or model unavailable", body = ErrorResponse),
    )
)]
pub(crate) async fn get_forecast(
    State(state): State<AppState>,
) -> Result<Json<ForecastReport>, AppError> {
    let pipeline = state
        .forecaster
        .as_ref()
        .map_err(|reason| AppError::ModelUnavailable(reason.clone()))?;

    let report = pipeline.run_cycle().await.inspect_err(|e| {
        tracing::error!("Forecast cycle failed: {}", e);
    })?;
    Ok(Json(report.rounded()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_forecast_without_pipeline_is_unavailable() {
        let config = AppConfig::from_lookup(|_: &str| None::<String>).unwrap();
        let state = AppState {
            config: Arc::new(config),
            forecaster: Err("model file missing".to_string()),
        };

        let err = get_forecast(State(state)).await.unwrap_err();
        assert!(matches!(err, AppError::ModelUnavailable(_)));
        assert!(err.to_string().contains("model file missing"));
    }
}
