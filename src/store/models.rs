use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Pollutant readings observed at one hour.
///
/// A pollutant absent from `values` was not observed at that hour.
#[derive(Debug, Clone, PartialEq)]
pub struct TimePoint {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, f64>,
}

/// The single most recent reading, fetched at call time.
pub type LiveReading = TimePoint;

impl TimePoint {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style setter, mostly for fixtures.
    pub fn with(mut self, pollutant: &str, value: f64) -> Self {
        self.values.insert(pollutant.to_string(), value);
        self
    }

    pub fn get(&self, pollutant: &str) -> Option<f64> {
        self.values.get(pollutant).copied()
    }
}

/// Time-ordered pollutant table for one station, unique by timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalSeries {
    station: Option<String>,
    points: Vec<TimePoint>,
    columns: BTreeSet<String>,
}

impl HistoricalSeries {
    /// Sort `points` by timestamp; for duplicated timestamps the point that
    /// came last in the input wins.
    pub fn from_points(station: Option<String>, points: Vec<TimePoint>) -> Self {
        Self::with_columns(station, points, BTreeSet::new())
    }

    /// Like [`HistoricalSeries::from_points`], also recording columns the
    /// backing table declares even when no row has a value for them.
    pub fn with_columns(
        station: Option<String>,
        mut points: Vec<TimePoint>,
        declared: BTreeSet<String>,
    ) -> Self {
        // stable sort keeps input order among equal timestamps
        points.sort_by_key(|p| p.timestamp);

        let mut unique: Vec<TimePoint> = Vec::with_capacity(points.len());
        for point in points {
            match unique.last_mut() {
                Some(last) if last.timestamp == point.timestamp => *last = point,
                _ => unique.push(point),
            }
        }

        let mut columns = declared;
        for p in &unique {
            columns.extend(p.values.keys().cloned());
        }

        Self {
            station,
            points: unique,
            columns,
        }
    }

    pub fn station(&self) -> Option<&str> {
        self.station.as_deref()
    }

    pub fn points(&self) -> &[TimePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|p| p.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.timestamp)
    }

    /// Every pollutant column known to the table.
    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    /// Keep only points newer than `last_timestamp - window`.
    pub fn trailing(mut self, window: Duration) -> Self {
        if let Some(last) = self.last_timestamp() {
            let cutoff = last - window;
            self.points.retain(|p| p.timestamp > cutoff);
        }
        self
    }
}
