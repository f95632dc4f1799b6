//! CETESB QUALAR client.
//!
//! The QUALAR map service exposes one feature per station and day whose
//! attributes hold every hourly reading as `H<hh>_<POLLUTANT>` keys.

use chrono::{Duration, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::AppError;
use crate::helpers::parse_cell;
use crate::store::raw_files::{write_station_day, StationHourRow};

/// (attribute suffix, CSV column)
pub const POLLUTANT_KEYS: [(&str, &str); 6] = [
    ("MP25", "MP2,5"),
    ("MP10", "MP10"),
    ("O3", "O3"),
    ("NO2", "NO2"),
    ("CO", "CO"),
    ("SO2", "SO2"),
];

/// A monitoring station as addressed by QUALAR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Station {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct CetesbClient {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    features: Vec<Feature>,
    error: Option<QueryError>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QueryError {
    message: Option<String>,
}

/// Parse a collection date given as `dd/mm/YYYY`.
pub fn parse_collection_date(raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y")
        .map_err(|_| AppError::BadRequest(format!("invalid date '{}', expected dd/mm/YYYY", raw)))
}

pub fn station_day_path(dir: &Path, station_name: &str, date: NaiveDate) -> PathBuf {
    dir.join(format!(
        "dados_{}_{}.csv",
        station_name.to_lowercase(),
        date.format("%d-%m-%Y")
    ))
}

fn attribute_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_cell(s),
        _ => None,
    }
}

/// Expand one day's attributes into 24 hourly rows.
fn hourly_rows(
    date: NaiveDate,
    attributes: &serde_json::Map<String, serde_json::Value>,
) -> Vec<StationHourRow> {
    (0..24)
        .map(|hour| {
            let values: BTreeMap<String, f64> = POLLUTANT_KEYS
                .iter()
                .filter_map(|(key, column)| {
                    attributes
                        .get(&format!("H{:02}_{}", hour, key))
                        .and_then(attribute_value)
                        .map(|v| (column.to_string(), v))
                })
                .collect();
            StationHourRow {
                data: date.format("%d/%m/%Y").to_string(),
                hora: format!("{:02}:00:00", hour),
                values,
            }
        })
        .collect()
}

impl CetesbClient {
    pub fn new(url: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Fetch the hourly readings of `station_id` on `date`.
    ///
    /// `Ok(None)` when QUALAR has no feature for that day.
    pub async fn fetch_day(
        &self,
        station_id: u32,
        date: NaiveDate,
    ) -> Result<Option<Vec<StationHourRow>>, AppError> {
        let where_clause = format!(
            "EstacaoID = {} AND data >= DATE '{}' AND data < DATE '{}'",
            station_id,
            date.format("%Y-%m-%d"),
            (date + Duration::days(1)).format("%Y-%m-%d")
        );

        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("where", where_clause.as_str()),
                ("outFields", "*"),
                ("returnGeometry", "false"),
                ("f", "json"),
            ])
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("CETESB request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "CETESB returned HTTP {}",
                response.status()
            )));
        }

        let body: QueryResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("CETESB JSON parse error: {}", e))
        })?;

        // ArcGIS reports query errors with HTTP 200
        if let Some(error) = body.error {
            return Err(AppError::ExternalServiceError(format!(
                "CETESB query error: {}",
                error.message.unwrap_or_else(|| "unknown".to_string())
            )));
        }

        Ok(body
            .features
            .first()
            .map(|feature| hourly_rows(date, &feature.attributes)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DayOutcome {
    Written(PathBuf),
    NoData,
    Failed(String),
}

/// Per-date results of a collection run, in request order.
#[derive(Debug, Clone, Default)]
pub struct CollectionSummary {
    pub days: Vec<(NaiveDate, DayOutcome)>,
}

impl CollectionSummary {
    pub fn written(&self) -> usize {
        self.count(|o| matches!(o, DayOutcome::Written(_)))
    }

    pub fn without_data(&self) -> usize {
        self.count(|o| matches!(o, DayOutcome::NoData))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, DayOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&DayOutcome) -> bool) -> usize {
        self.days.iter().filter(|(_, o)| pred(o)).count()
    }
}

impl fmt::Display for CollectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} days written, {} without data, {} failed",
            self.written(),
            self.without_data(),
            self.failed()
        )
    }
}

async fn collect_day(
    client: &CetesbClient,
    station: &Station,
    date: NaiveDate,
    out_dir: &Path,
) -> Result<Option<PathBuf>, AppError> {
    let Some(rows) = client.fetch_day(station.id, date).await? else {
        return Ok(None);
    };
    let columns: Vec<&str> = POLLUTANT_KEYS.iter().map(|(_, c)| *c).collect();
    let path = station_day_path(out_dir, &station.name, date);
    write_station_day(&path, &columns, &rows)?;
    Ok(Some(path))
}

/// Collect every date for `station` concurrently. A failing date is logged
/// and recorded; it does not stop the others.
pub async fn collect_days(
    client: &CetesbClient,
    station: &Station,
    dates: &[NaiveDate],
    out_dir: &Path,
) -> CollectionSummary {
    let fetches = dates
        .iter()
        .map(|&date| async move { (date, collect_day(client, station, date, out_dir).await) });
    let results = futures::future::join_all(fetches).await;

    let days = results
        .into_iter()
        .map(|(date, result)| {
            let outcome = match result {
                Ok(Some(path)) => {
                    tracing::info!(
                        "Saved {} readings for {} to {}",
                        station.name,
                        date.format("%d/%m/%Y"),
                        path.display()
                    );
                    DayOutcome::Written(path)
                }
                Ok(None) => {
                    tracing::warn!(
                        "CETESB returned no data for {} on {}",
                        station.name,
                        date.format("%d/%m/%Y")
                    );
                    DayOutcome::NoData
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to collect {} on {}: {}",
                        station.name,
                        date.format("%d/%m/%Y"),
                        e
                    );
                    DayOutcome::Failed(e.to_string())
                }
            };
            (date, outcome)
        })
        .collect();

    CollectionSummary { days }
}
