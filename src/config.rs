use std::path::{Path, PathBuf};

use crate::errors::AppError;
use crate::services::aqi::AqiConversion;

pub const DEFAULT_IQAIR_BASE_URL: &str = "http://api.airvisual.com/v2";
pub const DEFAULT_CETESB_URL: &str =
    "https://arcgis.cetesb.sp.gov.br/server/rest/services/QUALAR/CETESB_QUALAR/MapServer/1/query";
pub const DEFAULT_POLLUTANTS: &str = "MP2.5,MP10,O3,NO2,CO,SO2";

/// A city as addressed by the IQAir `city` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub city: String,
    pub state: String,
    pub country: String,
}

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root of the scaffolded project layout.
    pub project_dir: PathBuf,
    pub history_path: PathBuf,
    pub dashboard_data_path: PathBuf,
    pub model_path: PathBuf,
    /// Output directory of the collectors.
    pub raw_data_dir: PathBuf,
    pub iqair_api_key: Option<String>,
    pub location: Location,
    pub iqair_base_url: String,
    pub cetesb_url: String,
    pub target_pollutant: String,
    pub pollutants: Vec<String>,
    /// Station filter for history files that carry an `Estacao` column.
    pub history_station: Option<String>,
    pub history_window_days: i64,
    pub aqi_conversion: AqiConversion,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let project_dir = PathBuf::from(var("PROJECT_DIR").unwrap_or_else(|| ".".to_string()));
        let under_project = |key: &str, default: &[&str]| -> PathBuf {
            var(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| join_all(&project_dir, default))
        };

        let history_path = under_project(
            "HISTORY_PATH",
            &["02_dados_processados", "dados_limpos_wide.csv"],
        );
        let dashboard_data_path = under_project(
            "DASHBOARD_DATA_PATH",
            &["02_dados_processados", "dados_para_dashboard.csv"],
        );
        let model_path = under_project("MODEL_PATH", &["05_modelos", "modelo_xgboost_mp25.json"]);
        let raw_data_dir = under_project("RAW_DATA_DIR", &["01_dados_brutos"]);

        let pollutants: Vec<String> = var("POLLUTANTS")
            .unwrap_or_else(|| DEFAULT_POLLUTANTS.to_string())
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        let target_pollutant = var("TARGET_POLLUTANT").unwrap_or_else(|| "MP2.5".to_string());
        if !pollutants.contains(&target_pollutant) {
            return Err(AppError::Config(format!(
                "TARGET_POLLUTANT '{}' is not listed in POLLUTANTS ({})",
                target_pollutant,
                pollutants.join(",")
            )));
        }

        let history_window_days: i64 = parse_or(var("HISTORY_WINDOW_DAYS"), 7, "HISTORY_WINDOW_DAYS")?;
        if history_window_days <= 0 {
            return Err(AppError::Config(
                "HISTORY_WINDOW_DAYS must be a positive number of days".to_string(),
            ));
        }

        let aqi_conversion = match var("AQI_CONVERSION") {
            Some(v) => v.parse::<AqiConversion>().map_err(AppError::Config)?,
            None => AqiConversion::Pm25,
        };

        Ok(Self {
            history_path,
            dashboard_data_path,
            model_path,
            raw_data_dir,
            project_dir,
            iqair_api_key: var("IQAIR_API_KEY"),
            location: Location {
                city: var("IQAIR_CITY").unwrap_or_else(|| "Sao Paulo".to_string()),
                state: var("IQAIR_STATE").unwrap_or_else(|| "Sao Paulo".to_string()),
                country: var("IQAIR_COUNTRY").unwrap_or_else(|| "Brazil".to_string()),
            },
            iqair_base_url: var("IQAIR_BASE_URL")
                .unwrap_or_else(|| DEFAULT_IQAIR_BASE_URL.to_string()),
            cetesb_url: var("CETESB_BASE_URL").unwrap_or_else(|| DEFAULT_CETESB_URL.to_string()),
            target_pollutant,
            pollutants,
            history_station: var("HISTORY_STATION"),
            history_window_days,
            aqi_conversion,
            port: parse_or(var("PORT"), 8080, "PORT")?,
        })
    }

    /// The IQAir key, required by every operation that talks to IQAir.
    pub fn require_iqair_key(&self) -> Result<&str, AppError> {
        self.iqair_api_key.as_deref().ok_or_else(|| {
            AppError::Config("IQAIR_API_KEY must be set to query IQAir".to_string())
        })
    }

    pub fn history_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.history_window_days)
    }
}

fn join_all(base: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(base.to_path_buf(), |acc, p| acc.join(p))
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T, key: &str) -> Result<T, AppError> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} has an invalid value '{}'", key, v))),
        None => Ok(default),
    }
}
