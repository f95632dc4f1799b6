pub mod aqi;
pub mod cetesb;
pub mod dashboard;
pub mod features;
pub mod forecast;
pub mod iqair;
pub mod model;
pub mod scaffold;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::store::history::CsvHistoryStore;
use forecast::{ForecastPipeline, PipelineSettings};
use iqair::{IqAirClient, IqAirLiveSource};

/// Forecast pipeline fed by IQAir and the historical CSV.
pub type LivePipeline = ForecastPipeline<IqAirLiveSource, CsvHistoryStore>;

/// Load the model and wire up the live pipeline from configuration.
pub fn build_live_pipeline(config: &AppConfig) -> Result<LivePipeline, AppError> {
    let model = model::load_model(&config.model_path)?;
    let client = IqAirClient::new(&config.iqair_base_url, config.require_iqair_key()?)?;
    let source = IqAirLiveSource::new(client, &config.target_pollutant, config.aqi_conversion);
    let history = CsvHistoryStore::new(&config.history_path);

    ForecastPipeline::new(source, history, model, PipelineSettings::from_config(config))
}
