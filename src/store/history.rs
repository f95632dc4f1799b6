//! Historical pollutant store backed by the processed wide CSV.

use chrono::Duration;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use super::models::{HistoricalSeries, TimePoint};
use super::wide_table::read_wide_table;
use crate::errors::AppError;

/// Read-only access to past pollutant values.
pub trait HistoricalStore: Send + Sync {
    /// Load the trailing `window` of readings for `station`, sorted by time
    /// and unique by timestamp.
    ///
    /// A missing or unreadable backing table is `HistoryUnavailable`; an
    /// empty series is never returned in its place.
    fn load_trailing(
        &self,
        station: Option<&str>,
        window: Duration,
    ) -> Result<HistoricalSeries, AppError>;
}

/// [`HistoricalStore`] reading `dados_limpos_wide.csv`-style tables.
#[derive(Debug, Clone)]
pub struct CsvHistoryStore {
    path: PathBuf,
}

impl CsvHistoryStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl HistoricalStore for CsvHistoryStore {
    fn load_trailing(
        &self,
        station: Option<&str>,
        window: Duration,
    ) -> Result<HistoricalSeries, AppError> {
        let table = read_wide_table(&self.path)
            .map_err(|e| {
                AppError::HistoryUnavailable(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                ))
            })?
            .ok_or_else(|| {
                AppError::HistoryUnavailable(format!("{} does not exist", self.path.display()))
            })?;

        let rows = if table.has_station_column {
            match station {
                Some(wanted) => table
                    .rows
                    .into_iter()
                    .filter(|r| r.station.as_deref() == Some(wanted))
                    .collect(),
                None => {
                    let station_count = table
                        .rows
                        .iter()
                        .filter_map(|r| r.station.as_deref())
                        .collect::<HashSet<_>>()
                        .len();
                    if station_count > 1 {
                        return Err(AppError::HistoryUnavailable(format!(
                            "{} holds {} stations; a station must be selected",
                            self.path.display(),
                            station_count
                        )));
                    }
                    table.rows
                }
            }
        } else {
            if let Some(wanted) = station {
                tracing::debug!(
                    "{} has no station column, using all rows for '{}'",
                    self.path.display(),
                    wanted
                );
            }
            table.rows
        };

        let points: Vec<TimePoint> = rows
            .into_iter()
            .map(|r| TimePoint {
                timestamp: r.timestamp,
                values: r.values,
            })
            .collect();

        let declared: BTreeSet<String> = table.columns.into_iter().collect();
        let series = HistoricalSeries::with_columns(station.map(str::to_string), points, declared)
            .trailing(window);

        if series.is_empty() {
            return Err(AppError::HistoryUnavailable(format!(
                "{} has no rows{}",
                self.path.display(),
                station
                    .map(|s| format!(" for station '{}'", s))
                    .unwrap_or_default()
            )));
        }

        tracing::info!(
            "Loaded {} historical rows for {} ({} .. {}) from {}",
            series.len(),
            series.station().unwrap_or("all stations"),
            series
                .first_timestamp()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            series
                .last_timestamp()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            self.path.display()
        );

        Ok(series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::io::Write;

    fn write_table(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_missing_file_is_history_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvHistoryStore::new(&dir.path().join("dados_limpos_wide.csv"));
        let err = store.load_trailing(None, Duration::days(7)).unwrap_err();
        assert!(matches!(err, AppError::HistoryUnavailable(_)));
    }

    #[test]
    fn test_load_trailing_window() {
        let file = write_table(
            "datetime,MP2.5,O3\n\
             2025-05-01 00:00:00,1,1\n\
             2025-05-10 00:00:00,2,2\n\
             2025-05-15 00:00:00,3,3\n\
             2025-05-16 00:00:00,4,\n",
        );
        let store = CsvHistoryStore::new(file.path());
        let series = store.load_trailing(None, Duration::days(7)).unwrap();

        assert_eq!(series.len(), 3);
        assert_eq!(
            series.first_timestamp(),
            Some(Utc.with_ymd_and_hms(2025, 5, 10, 0, 0, 0).unwrap())
        );
        assert!(series.columns().contains("O3"));
        assert_eq!(series.points()[2].get("O3"), None);
    }

    #[test]
    fn test_unsorted_and_duplicated_rows() {
        let file = write_table(
            "datetime,MP2.5\n\
             2025-05-15 02:00:00,3\n\
             2025-05-15 00:00:00,1\n\
             2025-05-15 02:00:00,30\n",
        );
        let store = CsvHistoryStore::new(file.path());
        let series = store.load_trailing(None, Duration::days(7)).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[1].get("MP2.5"), Some(30.0));
    }

    #[test]
    fn test_station_filter() {
        let file = write_table(
            "datetime,Estacao,MP2.5\n\
             2025-05-15 00:00:00,Pinheiros,10\n\
             2025-05-15 00:00:00,Ibirapuera,99\n\
             2025-05-15 01:00:00,Pinheiros,11\n",
        );
        let store = CsvHistoryStore::new(file.path());
        let series = store
            .load_trailing(Some("Pinheiros"), Duration::days(7))
            .unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.station(), Some("Pinheiros"));
        assert_eq!(series.points()[0].get("MP2.5"), Some(10.0));
    }

    #[test]
    fn test_several_stations_need_a_filter() {
        let file = write_table(
            "datetime,Estacao,MP2.5\n\
             2025-05-15 00:00:00,Pinheiros,10\n\
             2025-05-15 00:00:00,Ibirapuera,99\n",
        );
        let store = CsvHistoryStore::new(file.path());
        let err = store.load_trailing(None, Duration::days(7)).unwrap_err();
        assert!(err.to_string().contains("2 stations"));
    }

    #[test]
    fn test_unknown_station_is_unavailable() {
        let file = write_table("datetime,Estacao,MP2.5\n2025-05-15 00:00:00,Pinheiros,10\n");
        let store = CsvHistoryStore::new(file.path());
        let err = store
            .load_trailing(Some("Santana"), Duration::days(7))
            .unwrap_err();
        assert!(matches!(err, AppError::HistoryUnavailable(_)));
    }
}
