//! Raw collector output in `01_dados_brutos/`.
//!
//! Both collectors write `;`-separated UTF-8 files with a byte order mark,
//! since CETESB column names such as `MP2,5` contain commas.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::AppError;
use crate::helpers::{parse_timestamp, UTF8_BOM};

/// One row of the IQAir real-time log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IqAirRow {
    pub datetime: String,
    pub aqi_us: Option<f64>,
    pub poluente_principal_us: Option<String>,
    pub temperatura: Option<f64>,
    pub umidade: Option<f64>,
    pub pressao: Option<f64>,
    pub vento_velocidade: Option<f64>,
}

/// One hour of a CETESB station day.
#[derive(Debug, Clone, PartialEq)]
pub struct StationHourRow {
    /// `dd/mm/YYYY`
    pub data: String,
    /// `hh:00:00`
    pub hora: String,
    /// Column name (e.g. `MP2,5`) → value. Only observed values are present.
    pub values: BTreeMap<String, f64>,
}

/// Merge `row` into the IQAir log at `path`.
///
/// Existing rows are kept, rows with the same `datetime` are replaced by the
/// newest one and the file is rewritten sorted by `datetime`. Returns the
/// number of rows in the file afterwards.
pub fn upsert_iqair_row(path: &Path, row: IqAirRow) -> Result<usize, AppError> {
    let mut rows = match std::fs::read_to_string(path) {
        Ok(content) => {
            tracing::info!("Existing file found at {}, appending measurement", path.display());
            read_iqair_rows(&content)?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("Creating new data file {}", path.display());
            Vec::new()
        }
        Err(e) => return Err(AppError::Io(e)),
    };
    rows.push(row);

    // sort by parsed timestamp; unparseable values sort first, in file order
    let mut keyed: Vec<_> = rows
        .into_iter()
        .enumerate()
        .map(|(i, r)| (parse_timestamp(&r.datetime), i, r))
        .collect();
    keyed.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    let mut merged: Vec<(Option<chrono::DateTime<chrono::Utc>>, IqAirRow)> = Vec::new();
    for (ts, _, row) in keyed {
        match merged.last_mut() {
            Some(last) if ts.is_some() && last.0 == ts => last.1 = row,
            _ => merged.push((ts, row)),
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(UTF8_BOM.as_bytes().to_vec());
    for (_, row) in &merged {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Io(e.into_error()))?;
    std::fs::write(path, bytes)?;

    Ok(merged.len())
}

fn read_iqair_rows(content: &str) -> Result<Vec<IqAirRow>, AppError> {
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_reader(content.as_bytes());
    reader
        .deserialize()
        .collect::<Result<Vec<IqAirRow>, _>>()
        .map_err(AppError::from)
}

/// Write one CETESB station day to `path`.
///
/// The header is `Data;Hora` followed by every column in `columns` that has
/// at least one value in `rows`, in the given order.
pub fn write_station_day(
    path: &Path,
    columns: &[&str],
    rows: &[StationHourRow],
) -> Result<(), AppError> {
    let present: Vec<&str> = columns
        .iter()
        .copied()
        .filter(|c| rows.iter().any(|r| r.values.contains_key(*c)))
        .collect();

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_writer(UTF8_BOM.as_bytes().to_vec());

    let mut header = vec!["Data", "Hora"];
    header.extend(present.iter().copied());
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.data.clone(), row.hora.clone()];
        record.extend(
            present
                .iter()
                .map(|c| row.values.get(*c).map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::Io(e.into_error()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}
