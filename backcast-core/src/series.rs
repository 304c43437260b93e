//! Time series and evaluation-region bounds.
//!
//! A `TimeSeries` is the immutable input to every backtest: strictly ascending,
//! de-duplicated wall-clock timestamps in a single zone, with one finite value
//! per timestamp. Series providers are responsible for cleaning raw data before
//! constructing one; construction only validates.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

/// Errors from series construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("length mismatch: {timestamps} timestamps vs {values} values")]
    LengthMismatch { timestamps: usize, values: usize },

    #[error("timestamps not strictly ascending at row {index}")]
    NotAscending { index: usize },

    #[error("non-finite value at row {index}")]
    NonFinite { index: usize },
}

/// Clock of a series: either naive wall-clock time or a fixed UTC offset.
///
/// Timestamps of a zoned series are stored as local wall-clock time in that
/// offset, so comparisons never need the offset once bounds are normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesZone {
    Naive,
    Fixed(FixedOffset),
}

impl SeriesZone {
    pub fn is_naive(&self) -> bool {
        matches!(self, SeriesZone::Naive)
    }
}

/// Ordered (timestamp, value) sequence. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    timestamps: Vec<NaiveDateTime>,
    values: Vec<f64>,
    zone: SeriesZone,
}

impl TimeSeries {
    /// Build a series from parallel vectors, validating shape and ordering.
    pub fn new(
        timestamps: Vec<NaiveDateTime>,
        values: Vec<f64>,
        zone: SeriesZone,
    ) -> Result<Self, SeriesError> {
        if timestamps.len() != values.len() {
            return Err(SeriesError::LengthMismatch {
                timestamps: timestamps.len(),
                values: values.len(),
            });
        }
        if let Some(index) = timestamps.windows(2).position(|w| w[0] >= w[1]) {
            return Err(SeriesError::NotAscending { index: index + 1 });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(SeriesError::NonFinite { index });
        }
        Ok(Self {
            timestamps,
            values,
            zone,
        })
    }

    /// Build a series from (timestamp, value) pairs.
    pub fn from_points(
        points: impl IntoIterator<Item = (NaiveDateTime, f64)>,
        zone: SeriesZone,
    ) -> Result<Self, SeriesError> {
        let (timestamps, values) = points.into_iter().unzip();
        Self::new(timestamps, values, zone)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn zone(&self) -> SeriesZone {
        self.zone
    }

    /// Number of leading rows at or before `end`.
    pub fn rows_through(&self, end: NaiveDateTime) -> usize {
        self.timestamps.partition_point(|t| *t <= end)
    }
}

// ─── Region bounds ───────────────────────────────────────────────────

/// One bound of an evaluation region, as supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionBound {
    Naive(NaiveDateTime),
    Aware(DateTime<FixedOffset>),
}

impl RegionBound {
    /// Midnight of `date`, without a zone.
    pub fn date(date: NaiveDate) -> Self {
        RegionBound::Naive(date.and_time(NaiveTime::MIN))
    }

    /// Express this bound on the series' clock.
    ///
    /// - naive bound: localized to the series zone (wall-clock value kept)
    /// - aware bound, naive series: converted to UTC, zone dropped
    /// - aware bound, zoned series: converted into the series offset
    pub fn normalize(&self, zone: SeriesZone) -> NaiveDateTime {
        match (self, zone) {
            (RegionBound::Naive(t), _) => *t,
            (RegionBound::Aware(t), SeriesZone::Naive) => t.naive_utc(),
            (RegionBound::Aware(t), SeriesZone::Fixed(offset)) => {
                t.with_timezone(&offset).naive_local()
            }
        }
    }
}

/// Inclusive evaluation region `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationRegion {
    pub start: RegionBound,
    pub end: RegionBound,
}

impl EvaluationRegion {
    pub fn new(start: RegionBound, end: RegionBound) -> Self {
        Self { start, end }
    }

    /// Region spanning midnight of `start` through midnight of `end`.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(RegionBound::date(start), RegionBound::date(end))
    }

    /// Both bounds on the series' clock.
    pub fn normalize(&self, zone: SeriesZone) -> (NaiveDateTime, NaiveDateTime) {
        (self.start.normalize(zone), self.end.normalize(zone))
    }
}
