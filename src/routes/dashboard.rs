//! Dashboard data endpoints.
//!
//! - GET /api/v1/dashboard/stations
//! - GET /api/v1/dashboard/series?station=..&pollutant=..

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use utoipa::IntoParams;

use super::AppState;
use crate::errors::{AppError, ErrorResponse};
use crate::services::dashboard::{DashboardData, SeriesResponse, StationsResponse};

#[derive(Debug, Deserialize, IntoParams)]
pub struct SeriesQuery {
    /// Station name (defaults to the first station in the table)
    pub station: Option<String>,
    /// Pollutant column (defaults to MP2.5, or the first pollutant)
    pub pollutant: Option<String>,
}

/// List stations and pollutant columns of the dashboard table.
#[utoipa::path(
    get,
    path = "/api/v1/dashboard/stations",
    tag = "Dashboard",
    responses(
        (status = 200, description = "Stations and pollutants", body = StationsResponse),
        (status = 404, description = "Dashboard table not found", body = ErrorResponse),
    )
)]
pub(crate) async fn get_stations(
    State(state): State<AppState>,
) -> Result<Json<StationsResponse>, AppError> {
    let data = DashboardData::load(&state.config.dashboard_data_path)?;
    Ok(Json(data.overview()))
}

/// Time series and mean/max/min of one pollutant at one station.
#[utoipa::path(
    get,
    path = "/api/v1/dashboard/series",
    tag = "Dashboard",
    params(SeriesQuery),
    responses(
        (status = 200, description = "Pollutant time series", body = SeriesResponse),
        (status = 400, description = "Unknown pollutant", body = ErrorResponse),
        (status = 404, description = "Dashboard table or station not found", body = ErrorResponse),
    )
)]
pub(crate) async fn get_series(
    State(state): State<AppState>,
    Query(query): Query<SeriesQuery>,
) -> Result<Json<SeriesResponse>, AppError> {
    let data = DashboardData::load(&state.config.dashboard_data_path)?;
    let series = data.series(query.station.as_deref(), query.pollutant.as_deref())?;
    Ok(Json(series))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn state_for(dir: &std::path::Path) -> AppState {
        let vars: HashMap<&str, String> =
            [("PROJECT_DIR", dir.display().to_string())].into_iter().collect();
        AppState {
            config: Arc::new(AppConfig::from_lookup(|k| vars.get(k).cloned()).unwrap()),
            forecaster: Err("not configured".to_string()),
        }
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = get_stations(State(state_for(dir.path()))).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_series_from_table() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("02_dados_processados");
        std::fs::create_dir_all(&processed).unwrap();
        std::fs::write(
            processed.join("dados_para_dashboard.csv"),
            "datetime,Estacao,MP2.5\n\
             2025-05-15 00:00:00,Pinheiros,10\n\
             2025-05-15 01:00:00,Pinheiros,14\n",
        )
        .unwrap();

        let query = SeriesQuery {
            station: Some("Pinheiros".to_string()),
            pollutant: None,
        };
        let Json(series) = get_series(State(state_for(dir.path())), Query(query))
            .await
            .unwrap();
        assert_eq!(series.pollutant, "MP2.5");
        assert_eq!(series.kpis.mean, Some(12.0));
    }
}
