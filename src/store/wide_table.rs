//! Reader for the processed "wide" CSV tables.
//!
//! One row per hour (and per station when an `Estacao` column is present),
//! one column per pollutant. Both the historical table used by the forecaster
//! and the dashboard table share this layout.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::AppError;
use crate::helpers::{parse_cell, parse_timestamp, UTF8_BOM};

pub const DATETIME_COLUMN: &str = "datetime";
pub const STATION_COLUMN: &str = "Estacao";

#[derive(Debug, Clone, PartialEq)]
pub struct WideRow {
    pub timestamp: DateTime<Utc>,
    pub station: Option<String>,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
pub struct WideTable {
    /// Pollutant columns in file order (timestamp and station excluded).
    pub columns: Vec<String>,
    pub has_station_column: bool,
    pub rows: Vec<WideRow>,
    /// Rows dropped because their timestamp could not be parsed.
    pub skipped_rows: usize,
}

/// Pick `;` or `,` from the header line, whichever occurs more often.
pub(crate) fn sniff_delimiter(header_line: &str) -> u8 {
    let semicolons = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// Read a wide table from `path`.
///
/// Returns `Ok(None)` if the file does not exist so callers can map absence
/// to their own error kind.
pub fn read_wide_table(path: &Path) -> Result<Option<WideTable>, AppError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(AppError::Io(e)),
    };
    parse_wide_table(&content).map(Some)
}

pub(crate) fn parse_wide_table(content: &str) -> Result<WideTable, AppError> {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    let header_line = content.lines().next().unwrap_or_default();

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(sniff_delimiter(header_line))
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let ts_idx = headers
        .iter()
        .position(|h| h == DATETIME_COLUMN)
        .ok_or_else(|| {
            AppError::BadRequest(format!("table has no '{}' column", DATETIME_COLUMN))
        })?;
    let station_idx = headers.iter().position(|h| h == STATION_COLUMN);

    let value_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != ts_idx && Some(*i) != station_idx && !h.is_empty())
        .map(|(i, h)| (i, h.clone()))
        .collect();

    let mut table = WideTable {
        columns: value_columns.iter().map(|(_, h)| h.clone()).collect(),
        has_station_column: station_idx.is_some(),
        ..Default::default()
    };

    for record in reader.records() {
        let record = record?;
        let Some(timestamp) = record.get(ts_idx).and_then(parse_timestamp) else {
            table.skipped_rows += 1;
            continue;
        };

        let station = station_idx
            .and_then(|i| record.get(i))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let values = value_columns
            .iter()
            .filter_map(|(i, name)| {
                record
                    .get(*i)
                    .and_then(parse_cell)
                    .map(|v| (name.clone(), v))
            })
            .collect();

        table.rows.push(WideRow {
            timestamp,
            station,
            values,
        });
    }

    if table.skipped_rows > 0 {
        tracing::warn!(
            "Skipped {} rows with an unreadable '{}' value",
            table.skipped_rows,
            DATETIME_COLUMN
        );
    }

    Ok(table)
}
