//! Read-only views over the processed dashboard table.
//!
//! The table (`dados_para_dashboard.csv`) has a `datetime` column, an
//! `Estacao` column and one column per pollutant.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use utoipa::ToSchema;

use crate::errors::AppError;
use crate::helpers::round_2dp_f64;
use crate::store::wide_table::{read_wide_table, WideTable};

/// Pollutant shown when the caller does not pick one.
pub const PREFERRED_POLLUTANT: &str = "MP2.5";

#[derive(Debug, Serialize, ToSchema)]
pub struct StationsResponse {
    /// Stations in order of first appearance
    pub stations: Vec<String>,
    /// Pollutant columns in file order
    pub pollutants: Vec<String>,
    pub default_pollutant: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SeriesPoint {
    pub datetime: DateTime<Utc>,
    pub value: Option<f64>,
}

/// Summary figures over the non-missing values of a series.
#[derive(Debug, Default, PartialEq, Serialize, ToSchema)]
pub struct SeriesKpis {
    pub mean: Option<f64>,
    pub max: Option<f64>,
    pub min: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SeriesResponse {
    pub station: Option<String>,
    pub pollutant: String,
    pub kpis: SeriesKpis,
    pub points: Vec<SeriesPoint>,
}

pub fn kpis(values: impl IntoIterator<Item = f64>) -> SeriesKpis {
    let values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return SeriesKpis::default();
    }
    let sum: f64 = values.iter().sum();
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    SeriesKpis {
        mean: round_2dp_f64(sum / values.len() as f64),
        max: round_2dp_f64(max),
        min: round_2dp_f64(min),
        count: values.len(),
    }
}

#[derive(Debug, Clone)]
pub struct DashboardData {
    table: WideTable,
}

impl DashboardData {
    /// Load the dashboard table; a missing file is `NotFound`.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let table = read_wide_table(path)?.ok_or_else(|| {
            AppError::NotFound(format!(
                "{} not found; run the processing notebook to produce it",
                path.display()
            ))
        })?;
        Ok(Self { table })
    }

    pub fn stations(&self) -> Vec<String> {
        let mut stations: Vec<String> = Vec::new();
        for station in self.table.rows.iter().filter_map(|r| r.station.as_ref()) {
            if !stations.contains(station) {
                stations.push(station.clone());
            }
        }
        stations
    }

    pub fn pollutants(&self) -> &[String] {
        &self.table.columns
    }

    pub fn default_pollutant(&self) -> Option<&str> {
        let pollutants = self.pollutants();
        pollutants
            .iter()
            .find(|p| *p == PREFERRED_POLLUTANT)
            .or_else(|| pollutants.first())
            .map(String::as_str)
    }

    pub fn overview(&self) -> StationsResponse {
        StationsResponse {
            stations: self.stations(),
            pollutants: self.pollutants().to_vec(),
            default_pollutant: self.default_pollutant().map(str::to_string),
        }
    }

    /// Time series of `pollutant` at `station`, defaulting to the first
    /// station and the preferred pollutant.
    pub fn series(
        &self,
        station: Option<&str>,
        pollutant: Option<&str>,
    ) -> Result<SeriesResponse, AppError> {
        let pollutant = match pollutant {
            Some(p) if self.pollutants().iter().any(|c| c == p) => p.to_string(),
            Some(p) => {
                return Err(AppError::BadRequest(format!(
                    "unknown pollutant '{}', expected one of [{}]",
                    p,
                    self.pollutants().join(", ")
                )))
            }
            None => self
                .default_pollutant()
                .ok_or_else(|| AppError::NotFound("table has no pollutant columns".to_string()))?
                .to_string(),
        };

        let station = match station {
            Some(s) => {
                if !self.stations().iter().any(|known| known == s) {
                    return Err(AppError::NotFound(format!("station '{}' not found", s)));
                }
                Some(s.to_string())
            }
            None => self.stations().into_iter().next(),
        };

        let mut rows: Vec<_> = self
            .table
            .rows
            .iter()
            .filter(|r| station.is_none() || r.station == station)
            .collect();
        rows.sort_by_key(|r| r.timestamp);

        let points: Vec<SeriesPoint> = rows
            .iter()
            .map(|r| SeriesPoint {
                datetime: r.timestamp,
                value: r.values.get(&pollutant).copied(),
            })
            .collect();

        Ok(SeriesResponse {
            kpis: kpis(points.iter().filter_map(|p| p.value)),
            station,
            pollutant,
            points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::wide_table::parse_wide_table;

    fn data() -> DashboardData {
        let table = parse_wide_table(
            "datetime,Estacao,MP10,MP2.5\n\
             2025-05-15 01:00:00,Pinheiros,20,11\n\
             2025-05-15 00:00:00,Pinheiros,18,10\n\
             2025-05-15 00:00:00,Ibirapuera,30,\n\
             2025-05-15 02:00:00,Pinheiros,22,15.5\n",
        )
        .unwrap();
        DashboardData { table }
    }

    #[test]
    fn test_overview() {
        let overview = data().overview();
        assert_eq!(overview.stations, vec!["Pinheiros", "Ibirapuera"]);
        assert_eq!(overview.pollutants, vec!["MP10", "MP2.5"]);
        assert_eq!(overview.default_pollutant.as_deref(), Some("MP2.5"));
    }

    #[test]
    fn test_series_defaults() {
        let series = data().series(None, None).unwrap();
        assert_eq!(series.station.as_deref(), Some("Pinheiros"));
        assert_eq!(series.pollutant, "MP2.5");
        assert_eq!(series.points.len(), 3);
        assert!(series.points[0].datetime < series.points[1].datetime);
        assert_eq!(series.kpis.max, Some(15.5));
        assert_eq!(series.kpis.min, Some(10.0));
        assert_eq!(series.kpis.mean, Some(12.17));
    }

    #[test]
    fn test_series_missing_values_excluded_from_kpis() {
        let series = data().series(Some("Ibirapuera"), Some("MP2.5")).unwrap();
        assert_eq!(series.points.len(), 1);
        assert_eq!(series.points[0].value, None);
        assert_eq!(series.kpis, SeriesKpis::default());
    }

    #[test]
    fn test_unknown_station_and_pollutant() {
        assert!(matches!(
            data().series(Some("Santana"), None),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            data().series(None, Some("PM1")),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_default_pollutant_falls_back_to_first() {
        let table = parse_wide_table("datetime,Estacao,O3,NO2\n2025-05-15 00:00:00,X,1,2\n").unwrap();
        assert_eq!(DashboardData { table }.default_pollutant(), Some("O3"));
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = DashboardData::load(&dir.path().join("dados_para_dashboard.csv")).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
