//! CSV series provider.
//!
//! One `<SYMBOL>.csv` per asset with a `timestamp,value` header. RFC 3339
//! timestamps produce a fixed-offset series (in the first row's offset); bare
//! `YYYY-MM-DD[ HH:MM:SS]` timestamps produce a naive series. Loading keeps
//! rows whose local date falls in the requested range, sorts them, keeps the
//! last value of a duplicated timestamp and drops non-finite values.

use std::path::{Path, PathBuf};

use backcast_core::{SeriesError, SeriesZone, TimeSeries};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no series file for '{symbol}' in {}", dir.display())]
    NotFound { symbol: String, dir: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unparseable timestamp '{value}' at row {row}")]
    Timestamp { row: usize, value: String },

    #[error("{}: mixes zoned and naive timestamps", path.display())]
    MixedZones { path: PathBuf },

    #[error("invalid series: {0}")]
    Series(#[from] SeriesError),
}

#[derive(Debug, Deserialize)]
struct Row {
    timestamp: String,
    value: String,
}

enum Stamp {
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

fn parse_stamp(raw: &str) -> Option<Stamp> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(Stamp::Aware(t));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Stamp::Naive(t));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| Stamp::Naive(d.and_time(NaiveTime::MIN)))
}

/// Directory of per-symbol CSV files.
#[derive(Debug, Clone)]
pub struct CsvSeriesProvider {
    dir: PathBuf,
}

impl CsvSeriesProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Symbols with a series file, sorted, at most `limit`.
    pub fn list_symbols(&self, limit: Option<usize>) -> Result<Vec<String>, LoadError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| LoadError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut symbols: Vec<String> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        symbols.sort();
        if let Some(limit) = limit {
            symbols.truncate(limit);
        }
        Ok(symbols)
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.csv"))
    }

    /// Load `symbol`, keeping rows dated `from..=to`.
    pub fn load(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<TimeSeries, LoadError> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return Err(LoadError::NotFound {
                symbol: symbol.to_string(),
                dir: self.dir.clone(),
            });
        }

        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(&path)?;
        let mut zone: Option<SeriesZone> = None;
        let mut points: Vec<(NaiveDateTime, f64)> = Vec::new();
        let mut dropped = 0usize;

        for (row, record) in reader.deserialize::<Row>().enumerate() {
            let record = record?;
            let stamp = parse_stamp(&record.timestamp).ok_or_else(|| LoadError::Timestamp {
                row: row + 1,
                value: record.timestamp.clone(),
            })?;

            let local = match (stamp, zone) {
                (Stamp::Naive(t), None) => {
                    zone = Some(SeriesZone::Naive);
                    t
                }
                (Stamp::Naive(t), Some(SeriesZone::Naive)) => t,
                (Stamp::Aware(t), None) => {
                    zone = Some(SeriesZone::Fixed(*t.offset()));
                    t.naive_local()
                }
                (Stamp::Aware(t), Some(SeriesZone::Fixed(offset))) => {
                    t.with_timezone(&offset).naive_local()
                }
                _ => return Err(LoadError::MixedZones { path }),
            };

            let date = local.date();
            if date < from || date > to {
                continue;
            }
            match record.value.parse::<f64>() {
                Ok(v) if v.is_finite() => points.push((local, v)),
                _ => dropped += 1,
            }
        }

        // stable sort keeps file order among equal timestamps, so the last row wins
        points.sort_by_key(|(t, _)| *t);
        let mut deduped: Vec<(NaiveDateTime, f64)> = Vec::with_capacity(points.len());
        for (t, v) in points {
            match deduped.last_mut() {
                Some(last) if last.0 == t => last.1 = v,
                _ => deduped.push((t, v)),
            }
        }

        debug!(symbol, rows = deduped.len(), dropped, "series loaded");
        Ok(TimeSeries::from_points(
            deduped,
            zone.unwrap_or(SeriesZone::Naive),
        )?)
    }
}
