//! One-hour-ahead forecast cycle.
//!
//! A cycle reads the trailing history, fetches the live reading, builds the
//! feature row and applies the model. Every error is fatal to the cycle:
//! nothing is retried and no forecast is emitted for a failed cycle.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use utoipa::ToSchema;

use super::features::{validate_model_columns, FeatureRow, ForecastFeatureBuilder};
use super::model::TrainedModel;
use crate::config::{AppConfig, Location};
use crate::errors::AppError;
use crate::helpers::round_2dp_f64;
use crate::store::history::HistoricalStore;
use crate::store::models::LiveReading;

/// Source of the single most recent reading.
///
/// An unavailable source is an error, never a zero-valued reading.
pub trait LiveReadingSource: Send + Sync {
    fn fetch_latest(
        &self,
        location: &Location,
    ) -> impl Future<Output = Result<LiveReading, AppError>> + Send;
}

/// Model output for the hour after the feature row.
#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    pub reference_time: DateTime<Utc>,
    pub target_time: DateTime<Utc>,
    pub value: f64,
}

/// Apply `model` to `row`. Model errors are returned unchanged.
pub fn forecast_next_hour(row: &FeatureRow, model: &dyn TrainedModel) -> Result<Forecast, AppError> {
    let value = model.predict(row)?;
    Ok(Forecast {
        reference_time: row.timestamp,
        target_time: row.timestamp + Duration::hours(1),
        value,
    })
}

/// A forecast together with the observation it was made from.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ForecastReport {
    /// Target pollutant column, e.g. `MP2.5`
    pub target: String,
    /// Timestamp of the live reading
    pub reference_time: DateTime<Utc>,
    /// Last observed target value
    pub last_observed: f64,
    /// Timestamp the forecast is for
    pub target_time: DateTime<Utc>,
    /// Forecast value
    pub forecast: f64,
}

impl ForecastReport {
    fn new(target: &str, last_observed: f64, forecast: Forecast) -> Self {
        Self {
            target: target.to_string(),
            reference_time: forecast.reference_time,
            last_observed,
            target_time: forecast.target_time,
            forecast: forecast.value,
        }
    }

    /// Copy with values rounded to 2 decimal places, for JSON output.
    pub fn rounded(&self) -> Self {
        Self {
            last_observed: round_2dp_f64(self.last_observed).unwrap_or(self.last_observed),
            forecast: round_2dp_f64(self.forecast).unwrap_or(self.forecast),
            ..self.clone()
        }
    }
}

impl fmt::Display for ForecastReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Last measurement ({} at {}): {:.2}",
            self.target,
            self.reference_time.format("%H:%M"),
            self.last_observed
        )?;
        write!(
            f,
            "Forecast for next hour ({}): {:.2}",
            self.target_time.format("%H:%M"),
            self.forecast
        )
    }
}

/// Everything a cycle needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub target: String,
    pub pollutants: Vec<String>,
    pub location: Location,
    pub station: Option<String>,
    pub window: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            target: config.target_pollutant.clone(),
            pollutants: config.pollutants.clone(),
            location: config.location.clone(),
            station: config.history_station.clone(),
            window: config.history_window(),
        }
    }
}

pub struct ForecastPipeline<S, H> {
    source: S,
    history: H,
    model: Box<dyn TrainedModel>,
    builder: ForecastFeatureBuilder,
    settings: PipelineSettings,
}

impl<S, H> ForecastPipeline<S, H>
where
    S: LiveReadingSource,
    H: HistoricalStore,
{
    /// Wire up a pipeline, checking the model's input columns against the
    /// derivable features once.
    pub fn new(
        source: S,
        history: H,
        model: Box<dyn TrainedModel>,
        settings: PipelineSettings,
    ) -> Result<Self, AppError> {
        let unused = validate_model_columns(
            model.expected_columns(),
            settings.pollutants.iter().map(String::as_str),
        )?;
        if !unused.is_empty() {
            tracing::debug!("Model ignores derivable columns: {}", unused.join(", "));
        }

        Ok(Self {
            source,
            history,
            model,
            builder: ForecastFeatureBuilder::new(&settings.target),
            settings,
        })
    }

    /// Run one forecast cycle.
    pub async fn run_cycle(&self) -> Result<ForecastReport, AppError> {
        let history = self
            .history
            .load_trailing(self.settings.station.as_deref(), self.settings.window)?;

        let live = self.source.fetch_latest(&self.settings.location).await?;
        let last_observed = live.get(&self.settings.target).ok_or_else(|| {
            AppError::SourceUnavailable(format!(
                "live reading has no value for {}",
                self.settings.target
            ))
        })?;

        let row = self
            .builder
            .build_feature_row(&live, &history, self.model.expected_columns())?;
        let forecast = forecast_next_hour(&row, self.model.as_ref())?;

        tracing::info!(
            "Forecast {} for {}: {:.2} (last {:.2} at {})",
            self.settings.target,
            forecast.target_time.to_rfc3339(),
            forecast.value,
            last_observed,
            forecast.reference_time.to_rfc3339()
        );

        Ok(ForecastReport::new(&self.settings.target, last_observed, forecast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::model::LinearModel;
    use crate::store::models::{HistoricalSeries, TimePoint};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TARGET: &str = "MP2.5";

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, day, hour, 0, 0).unwrap()
    }

    fn settings() -> PipelineSettings {
        PipelineSettings {
            target: TARGET.to_string(),
            pollutants: vec![TARGET.to_string(), "O3".to_string()],
            location: Location {
                city: "Sao Paulo".to_string(),
                state: "Sao Paulo".to_string(),
                country: "Brazil".to_string(),
            },
            station: None,
            window: Duration::days(7),
        }
    }

    struct FixedSource(Option<LiveReading>);

    impl LiveReadingSource for FixedSource {
        async fn fetch_latest(&self, _location: &Location) -> Result<LiveReading, AppError> {
            self.0
                .clone()
                .ok_or_else(|| AppError::SourceUnavailable("offline".to_string()))
        }
    }

    struct FixedHistory(Option<HistoricalSeries>);

    impl HistoricalStore for FixedHistory {
        fn load_trailing(
            &self,
            _station: Option<&str>,
            _window: Duration,
        ) -> Result<HistoricalSeries, AppError> {
            self.0
                .clone()
                .ok_or_else(|| AppError::HistoryUnavailable("no file".to_string()))
        }
    }

    /// Returns `lag_1h + 1` and counts its calls.
    struct CountingModel {
        columns: Vec<String>,
        calls: Arc<AtomicUsize>,
    }

    impl TrainedModel for CountingModel {
        fn expected_columns(&self) -> &[String] {
            &self.columns
        }

        fn predict(&self, row: &FeatureRow) -> Result<f64, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            row.get("lag_1h")
                .flatten()
                .map(|v| v + 1.0)
                .ok_or_else(|| AppError::ModelApplication("lag_1h missing".to_string()))
        }

        fn kind(&self) -> &'static str {
            "counting"
        }
    }

    fn counting_model(columns: &[&str]) -> (Box<dyn TrainedModel>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = CountingModel {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            calls: calls.clone(),
        };
        (Box::new(model), calls)
    }

    fn history() -> HistoricalSeries {
        HistoricalSeries::from_points(
            None,
            vec![
                TimePoint::new(at(15, 9)).with(TARGET, 10.0),
                TimePoint::new(at(15, 10)).with(TARGET, 20.0),
                TimePoint::new(at(15, 11)).with(TARGET, 30.0),
            ],
        )
    }

    #[test]
    fn test_forecast_next_hour_rolls_over_midnight() {
        let model = LinearModel::new(vec!["hora".to_string()], vec![1.0], 0.0).unwrap();
        let row = FeatureRow {
            timestamp: Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap(),
            columns: vec!["hora".to_string()],
            values: vec![Some(23.0)],
        };

        let forecast = forecast_next_hour(&row, &model).unwrap();
        assert_eq!(
            forecast.target_time,
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(forecast.value, 23.0);
    }

    #[test]
    fn test_forecast_next_hour_surfaces_model_error() {
        let model = LinearModel::new(vec!["lag_3h".to_string()], vec![1.0], 0.0).unwrap();
        let row = FeatureRow {
            timestamp: at(15, 12),
            columns: vec!["lag_3h".to_string()],
            values: vec![None],
        };
        let err = forecast_next_hour(&row, &model).unwrap_err();
        assert!(matches!(err, AppError::ModelApplication(_)));
    }

    #[tokio::test]
    async fn test_run_cycle() {
        let (model, calls) = counting_model(&["hora", "lag_1h", "media_movel_3h"]);
        let pipeline = ForecastPipeline::new(
            FixedSource(Some(TimePoint::new(at(15, 12)).with(TARGET, 40.0))),
            FixedHistory(Some(history())),
            model,
            settings(),
        )
        .unwrap();

        let report = pipeline.run_cycle().await.unwrap();
        assert_eq!(report.forecast, 31.0);
        assert_eq!(report.last_observed, 40.0);
        assert_eq!(report.target_time, at(15, 13));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_model_column_fails_before_prediction() {
        let (model, calls) = counting_model(&["hora", "lag_24h"]);
        let result = ForecastPipeline::new(
            FixedSource(Some(TimePoint::new(at(15, 12)).with(TARGET, 40.0))),
            FixedHistory(Some(history())),
            model,
            settings(),
        );

        match result {
            Err(AppError::SchemaMismatch { missing, .. }) => {
                assert_eq!(missing, vec!["lag_24h".to_string()])
            }
            Err(other) => panic!("expected SchemaMismatch, got {:?}", other),
            Ok(_) => panic!("expected SchemaMismatch"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_source_unavailable_aborts_cycle() {
        let (model, calls) = counting_model(&["lag_1h"]);
        let pipeline = ForecastPipeline::new(
            FixedSource(None),
            FixedHistory(Some(history())),
            model,
            settings(),
        )
        .unwrap();

        let err = pipeline.run_cycle().await.unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_history_aborts_cycle() {
        let (model, calls) = counting_model(&["lag_1h"]);
        let pipeline = ForecastPipeline::new(
            FixedSource(Some(TimePoint::new(at(15, 12)).with(TARGET, 40.0))),
            FixedHistory(None),
            model,
            settings(),
        )
        .unwrap();

        let err = pipeline.run_cycle().await.unwrap_err();
        assert!(matches!(err, AppError::HistoryUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_report_format() {
        let report = ForecastReport {
            target: TARGET.to_string(),
            reference_time: at(15, 12),
            last_observed: 40.0,
            target_time: at(15, 13),
            forecast: 31.456,
        };
        assert_eq!(
            report.to_string(),
            "Last measurement (MP2.5 at 12:00): 40.00\nForecast for next hour (13:00): 31.46"
        );
        assert_eq!(report.rounded().forecast, 31.46);
    }
}
