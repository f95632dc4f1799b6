//! Feature preparation for the one-hour-ahead forecast.
//!
//! The live reading is appended to the trailing history, every pollutant is
//! forward-filled, and the row for the live timestamp is enriched with
//! calendar, lag and rolling-mean features. Column names are the ones the
//! model was trained with and must not be renamed.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::AppError;
use crate::store::models::{HistoricalSeries, LiveReading, TimePoint};

pub const HOUR_COLUMN: &str = "hora";
pub const DAY_OF_WEEK_COLUMN: &str = "dia_da_semana";
pub const MONTH_COLUMN: &str = "mes";
pub const DAY_OF_YEAR_COLUMN: &str = "dia_do_ano";
pub const LAG_COLUMNS: [&str; 3] = ["lag_1h", "lag_2h", "lag_3h"];
pub const ROLLING_MEAN_COLUMN: &str = "media_movel_3h";

/// Number of preceding rows averaged into `media_movel_3h`.
const ROLLING_WINDOW: usize = 3;

/// One model input row, columns in the model's order.
///
/// `None` marks a feature that is undefined for this row (e.g. a lag before
/// the start of the history window).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub timestamp: DateTime<Utc>,
    pub columns: Vec<String>,
    pub values: Vec<Option<f64>>,
}

impl FeatureRow {
    /// `None` if the row has no such column, `Some(None)` if the column is
    /// present but undefined.
    pub fn get(&self, column: &str) -> Option<Option<f64>> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> + '_ {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// Names of the features computed from the timestamp and the target series.
pub fn derived_columns() -> Vec<&'static str> {
    let mut cols = vec![
        HOUR_COLUMN,
        DAY_OF_WEEK_COLUMN,
        MONTH_COLUMN,
        DAY_OF_YEAR_COLUMN,
    ];
    cols.extend(LAG_COLUMNS);
    cols.push(ROLLING_MEAN_COLUMN);
    cols
}

/// Check a model's declared input columns against the features this
/// pipeline can produce for the given pollutant columns.
///
/// Returns the derivable columns the model does not use; fails with the
/// full missing/unused diff if any model column cannot be produced.
pub fn validate_model_columns<'a>(
    expected: &[String],
    pollutants: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<String>, AppError> {
    let derivable: BTreeSet<String> = derived_columns()
        .into_iter()
        .map(str::to_string)
        .chain(pollutants.into_iter().map(str::to_string))
        .collect();
    let expected_set: BTreeSet<&String> = expected.iter().collect();

    let missing: Vec<String> = expected
        .iter()
        .filter(|c| !derivable.contains(*c))
        .cloned()
        .collect();
    let unused: Vec<String> = derivable
        .iter()
        .filter(|c| !expected_set.contains(c))
        .cloned()
        .collect();

    if !missing.is_empty() {
        return Err(AppError::SchemaMismatch {
            missing,
            extra: unused,
        });
    }
    Ok(unused)
}

/// Forward-fill every pollutant: a missing value takes the most recent
/// earlier value of the same pollutant. Values before the first observation
/// of a pollutant stay missing.
pub fn forward_fill(points: &[TimePoint]) -> Vec<TimePoint> {
    let mut last_known: BTreeMap<&str, f64> = BTreeMap::new();
    points
        .iter()
        .map(|point| {
            for (name, value) in &point.values {
                last_known.insert(name.as_str(), *value);
            }
            TimePoint {
                timestamp: point.timestamp,
                values: last_known
                    .iter()
                    .map(|(name, value)| (name.to_string(), *value))
                    .collect(),
            }
        })
        .collect()
}

/// Builds the single feature row for the newest reading of `target`.
#[derive(Debug, Clone)]
pub struct ForecastFeatureBuilder {
    target: String,
}

impl ForecastFeatureBuilder {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
        }
    }

    /// Enrich `live` with features computed against `history` and select
    /// exactly `expected_columns`, in that order.
    pub fn build_feature_row(
        &self,
        live: &LiveReading,
        history: &HistoricalSeries,
        expected_columns: &[String],
    ) -> Result<FeatureRow, AppError> {
        if history.is_empty() {
            return Err(AppError::HistoryUnavailable(
                "historical series is empty".to_string(),
            ));
        }
        if live.get(&self.target).is_none() {
            return Err(AppError::SourceUnavailable(format!(
                "live reading at {} has no value for {}",
                live.timestamp.to_rfc3339(),
                self.target
            )));
        }

        let series = self.combine(live, history);
        if series.len() < 2 {
            return Err(AppError::HistoryUnavailable(format!(
                "no historical rows precede the live reading at {}",
                live.timestamp.to_rfc3339()
            )));
        }
        let filled = forward_fill(&series);
        let current_idx = filled.len() - 1;
        let current = &filled[current_idx];

        let mut features: BTreeMap<String, Option<f64>> = BTreeMap::new();
        features.insert(HOUR_COLUMN.to_string(), Some(current.timestamp.hour() as f64));
        features.insert(
            DAY_OF_WEEK_COLUMN.to_string(),
            Some(current.timestamp.weekday().num_days_from_monday() as f64),
        );
        features.insert(MONTH_COLUMN.to_string(), Some(current.timestamp.month() as f64));
        features.insert(
            DAY_OF_YEAR_COLUMN.to_string(),
            Some(current.timestamp.ordinal() as f64),
        );

        // lags are row based: a gap in the history shifts the window
        for (i, name) in LAG_COLUMNS.iter().enumerate() {
            let lag = i + 1;
            let value = current_idx
                .checked_sub(lag)
                .and_then(|idx| filled[idx].get(&self.target));
            features.insert(name.to_string(), value);
        }

        let rolling = current_idx
            .checked_sub(ROLLING_WINDOW)
            .and_then(|start| {
                filled[start..current_idx]
                    .iter()
                    .map(|p| p.get(&self.target))
                    .collect::<Option<Vec<f64>>>()
            })
            .map(|window| window.iter().sum::<f64>() / window.len() as f64);
        features.insert(ROLLING_MEAN_COLUMN.to_string(), rolling);

        let pollutant_columns: BTreeSet<&String> = history
            .columns()
            .iter()
            .chain(live.values.keys())
            .collect();
        for column in pollutant_columns {
            features
                .entry(column.clone())
                .or_insert_with(|| current.get(column));
        }

        let missing: Vec<String> = expected_columns
            .iter()
            .filter(|c| !features.contains_key(*c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(AppError::SchemaMismatch {
                missing,
                extra: Vec::new(),
            });
        }

        let values = expected_columns
            .iter()
            .map(|c| features.get(c).copied().flatten())
            .collect();

        Ok(FeatureRow {
            timestamp: current.timestamp,
            columns: expected_columns.to_vec(),
            values,
        })
    }

    /// History up to (excluding) the live timestamp, followed by the live
    /// reading.
    fn combine(&self, live: &LiveReading, history: &HistoricalSeries) -> Vec<TimePoint> {
        let mut series: Vec<TimePoint> = Vec::with_capacity(history.len() + 1);
        let mut replaced = 0usize;
        let mut newer = 0usize;
        for point in history.points() {
            if point.timestamp < live.timestamp {
                series.push(point.clone());
            } else if point.timestamp == live.timestamp {
                replaced += 1;
            } else {
                newer += 1;
            }
        }

        if replaced > 0 {
            tracing::debug!(
                "Live reading replaces the historical row at {}",
                live.timestamp.to_rfc3339()
            );
        }
        if newer > 0 {
            tracing::warn!(
                "Ignoring {} historical rows newer than the live reading at {}",
                newer,
                live.timestamp.to_rfc3339()
            );
        }

        series.push(live.clone());
        series.sort_by_key(|p| p.timestamp);
        series
    }
}
