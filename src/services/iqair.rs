//! IQAir (AirVisual) real-time city client.
//!
//! Uses the free `city` endpoint, which returns the current US AQI, the main
//! pollutant and basic weather for a named city.
//! See: https://api-docs.iqair.com/

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::aqi::AqiConversion;
use super::forecast::LiveReadingSource;
use crate::config::Location;
use crate::errors::AppError;
use crate::helpers::{floor_to_hour, parse_timestamp, slug};
use crate::store::models::{LiveReading, TimePoint};
use crate::store::raw_files::{upsert_iqair_row, IqAirRow};

/// Client for the IQAir `city` endpoint.
#[derive(Debug, Clone)]
pub struct IqAirClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// Current conditions reported for a city.
#[derive(Debug, Clone, PartialEq)]
pub struct IqAirMeasurement {
    /// `pollution.ts` as sent by the API
    pub timestamp: String,
    pub aqi_us: Option<f64>,
    pub main_pollutant_us: Option<String>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub wind_speed_ms: Option<f64>,
}

impl From<IqAirMeasurement> for IqAirRow {
    fn from(m: IqAirMeasurement) -> Self {
        IqAirRow {
            datetime: m.timestamp,
            aqi_us: m.aqi_us,
            poluente_principal_us: m.main_pollutant_us,
            temperatura: m.temperature_c,
            umidade: m.humidity_pct,
            pressao: m.pressure_hpa,
            vento_velocidade: m.wind_speed_ms,
        }
    }
}

// --- IQAir JSON response types ---

#[derive(Debug, Deserialize)]
struct IqAirResponse {
    status: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct IqAirCityData {
    current: IqAirCurrent,
}

#[derive(Debug, Deserialize)]
struct IqAirCurrent {
    pollution: IqAirPollution,
    weather: Option<IqAirWeather>,
}

#[derive(Debug, Deserialize)]
struct IqAirPollution {
    ts: String,
    aqius: Option<f64>,
    mainus: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IqAirWeather {
    tp: Option<f64>,
    hu: Option<f64>,
    pr: Option<f64>,
    ws: Option<f64>,
}

impl IqAirClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Fetch the current conditions for `location`.
    pub async fn fetch_city(&self, location: &Location) -> Result<IqAirMeasurement, AppError> {
        tracing::info!("Fetching IQAir data for {}", location.city);

        let url = format!("{}/city", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("city", location.city.as_str()),
                ("state", location.state.as_str()),
                ("country", location.country.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AppError::ExternalServiceError(format!("IQAir request failed: {}", e)))?;

        let status = response.status();
        // failures carry a JSON body with data.message, even on 4xx
        let body: IqAirResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("IQAir returned HTTP {} ({})", status, e))
        })?;

        if body.status != "success" {
            let message = body
                .data
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(AppError::ExternalServiceError(format!(
                "IQAir API error: {}",
                message
            )));
        }

        let data: IqAirCityData = serde_json::from_value(body.data).map_err(|e| {
            AppError::ExternalServiceError(format!("IQAir response structure error: {}", e))
        })?;
        let weather = data.current.weather;

        Ok(IqAirMeasurement {
            timestamp: data.current.pollution.ts,
            aqi_us: data.current.pollution.aqius,
            main_pollutant_us: data.current.pollution.mainus,
            temperature_c: weather.as_ref().and_then(|w| w.tp),
            humidity_pct: weather.as_ref().and_then(|w| w.hu),
            pressure_hpa: weather.as_ref().and_then(|w| w.pr),
            wind_speed_ms: weather.as_ref().and_then(|w| w.ws),
        })
    }
}

/// Path of the real-time log for `city` under `raw_data_dir`.
pub fn iqair_log_path(raw_data_dir: &Path, city: &str) -> PathBuf {
    raw_data_dir.join(format!("dados_iqair_{}_tempo_real.csv", slug(city)))
}

/// Fetch the current measurement and merge it into the city's real-time log.
///
/// Returns the path written and the number of rows it now holds.
pub async fn collect(
    client: &IqAirClient,
    location: &Location,
    raw_data_dir: &Path,
) -> Result<(PathBuf, usize), AppError> {
    let measurement = client.fetch_city(location).await?;
    let path = iqair_log_path(raw_data_dir, &location.city);
    let rows = upsert_iqair_row(&path, measurement.into())?;
    tracing::info!("IQAir log {} now holds {} rows", path.display(), rows);
    Ok((path, rows))
}

/// [`LiveReadingSource`] backed by the IQAir `city` endpoint.
///
/// The reading carries a single value, the US AQI converted for the target
/// column, at the start of the reported hour.
#[derive(Debug, Clone)]
pub struct IqAirLiveSource {
    client: IqAirClient,
    target: String,
    conversion: AqiConversion,
}

impl IqAirLiveSource {
    pub fn new(client: IqAirClient, target: &str, conversion: AqiConversion) -> Self {
        Self {
            client,
            target: target.to_string(),
            conversion,
        }
    }

    fn to_reading(&self, measurement: &IqAirMeasurement) -> Result<LiveReading, AppError> {
        let timestamp = parse_timestamp(&measurement.timestamp).ok_or_else(|| {
            AppError::SourceUnavailable(format!(
                "unreadable IQAir timestamp '{}'",
                measurement.timestamp
            ))
        })?;
        let aqi = measurement
            .aqi_us
            .ok_or_else(|| AppError::SourceUnavailable("IQAir reported no AQI".to_string()))?;
        let value = self.conversion.apply(aqi).ok_or_else(|| {
            AppError::SourceUnavailable(format!("IQAir reported an invalid AQI ({})", aqi))
        })?;

        if self.conversion == AqiConversion::Raw {
            tracing::warn!(
                "Using US AQI {} verbatim as {}; the model expects a concentration",
                aqi,
                self.target
            );
        }

        Ok(TimePoint::new(floor_to_hour(timestamp)).with(&self.target, value))
    }
}

impl LiveReadingSource for IqAirLiveSource {
    async fn fetch_latest(&self, location: &Location) -> Result<LiveReading, AppError> {
        let measurement = self
            .client
            .fetch_city(location)
            .await
            .map_err(|e| AppError::SourceUnavailable(e.to_string()))?;
        self.to_reading(&measurement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sao_paulo() -> Location {
        Location {
            city: "Sao Paulo".to_string(),
            state: "Sao Paulo".to_string(),
            country: "Brazil".to_string(),
        }
    }

    fn success_body() -> serde_json::Value {
        json!({
            "status": "success",
            "data": {
                "city": "Sao Paulo",
                "current": {
                    "pollution": { "ts": "2025-06-10T14:00:00.000Z", "aqius": 57, "mainus": "p2" },
                    "weather": { "ts": "2025-06-10T14:00:00.000Z", "tp": 21, "pr": 1018, "hu": 60, "ws": 2.57 }
                }
            }
        })
    }

    async fn server_with(status: u16, body: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/city"))
            .and(query_param("city", "Sao Paulo"))
            .and(query_param("key", "secret"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_fetch_city() {
        let server = server_with(200, success_body()).await;
        let client = IqAirClient::new(&server.uri(), "secret").unwrap();

        let m = client.fetch_city(&sao_paulo()).await.unwrap();
        assert_eq!(m.timestamp, "2025-06-10T14:00:00.000Z");
        assert_eq!(m.aqi_us, Some(57.0));
        assert_eq!(m.main_pollutant_us.as_deref(), Some("p2"));
        assert_eq!(m.wind_speed_ms, Some(2.57));
    }

    #[tokio::test]
    async fn test_fetch_city_api_failure() {
        let body = json!({ "status": "fail", "data": { "message": "city_not_found" } });
        let server = server_with(400, body).await;
        let client = IqAirClient::new(&server.uri(), "secret").unwrap();

        let err = client.fetch_city(&sao_paulo()).await.unwrap_err();
        assert!(matches!(err, AppError::ExternalServiceError(_)));
        assert!(err.to_string().contains("city_not_found"));
    }

    #[tokio::test]
    async fn test_live_source_converts_aqi() {
        let server = server_with(200, success_body()).await;
        let client = IqAirClient::new(&server.uri(), "secret").unwrap();
        let source = IqAirLiveSource::new(client, "MP2.5", AqiConversion::Pm25);

        let reading = source.fetch_latest(&sao_paulo()).await.unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap()
        );
        // AQI 57 lies in the 51..100 segment (9.1..35.4 µg/m³)
        let pm25 = reading.get("MP2.5").unwrap();
        assert!(pm25 > 9.1 && pm25 < 35.4);
    }

    #[tokio::test]
    async fn test_live_source_raw_mode() {
        let server = server_with(200, success_body()).await;
        let client = IqAirClient::new(&server.uri(), "secret").unwrap();
        let source = IqAirLiveSource::new(client, "MP2.5", AqiConversion::Raw);

        let reading = source.fetch_latest(&sao_paulo()).await.unwrap();
        assert_eq!(reading.get("MP2.5"), Some(57.0));
    }

    #[tokio::test]
    async fn test_live_source_unavailable() {
        let server = server_with(500, json!({ "status": "fail", "data": {} })).await;
        let client = IqAirClient::new(&server.uri(), "secret").unwrap();
        let source = IqAirLiveSource::new(client, "MP2.5", AqiConversion::Pm25);

        let err = source.fetch_latest(&sao_paulo()).await.unwrap_err();
        assert!(matches!(err, AppError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_collect_writes_log() {
        let server = server_with(200, success_body()).await;
        let client = IqAirClient::new(&server.uri(), "secret").unwrap();
        let dir = tempfile::tempdir().unwrap();

        let (path, rows) = collect(&client, &sao_paulo(), dir.path()).await.unwrap();
        assert_eq!(rows, 1);
        assert!(path.ends_with("dados_iqair_sao_paulo_tempo_real.csv"));

        // same timestamp again replaces the row
        let (_, rows) = collect(&client, &sao_paulo(), dir.path()).await.unwrap();
        assert_eq!(rows, 1);
    }
}
