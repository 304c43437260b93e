//! Window planning — splitting a series into history/target evaluation slices.
//!
//! The full plan is computed up front as an immutable list of row-index
//! descriptors, so every window can be forecast independently and in parallel.
//!
//! Two policies:
//! - `BatchStride` (default): targets of `forecast_window_rows` rows starting at
//!   the first in-region row, advancing `stride_rows` rows per window. A trailing
//!   partial window is dropped rather than emitted short.
//! - `RollingSingleStep`: the first in-region row is the cutoff; every later row
//!   is a single-row target. Not numerically equivalent to `BatchStride`.
//!
//! In both policies a window's history is every row strictly before its target.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::series::TimeSeries;

/// Default minimum number of history rows before the first in-region row.
pub const DEFAULT_MIN_HISTORY_ROWS: usize = 10;

// ─── Policy & parameters ─────────────────────────────────────────────

/// Windowing strategy selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowingPolicy {
    #[default]
    BatchStride,
    RollingSingleStep,
}

impl WindowingPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            WindowingPolicy::BatchStride => "batch_stride",
            WindowingPolicy::RollingSingleStep => "rolling_single_step",
        }
    }
}

impl fmt::Display for WindowingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch_stride" | "batch" => Ok(WindowingPolicy::BatchStride),
            "rolling_single_step" | "rolling" => Ok(WindowingPolicy::RollingSingleStep),
            other => Err(format!(
                "unknown windowing policy '{other}' (expected batch_stride or rolling_single_step)"
            )),
        }
    }
}

/// Planner inputs other than the series and region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanParams {
    pub forecast_window_rows: usize,
    pub stride_rows: usize,
    pub min_history_rows: usize,
    pub policy: WindowingPolicy,
}

impl Default for PlanParams {
    fn default() -> Self {
        Self {
            forecast_window_rows: 1,
            stride_rows: 1,
            min_history_rows: DEFAULT_MIN_HISTORY_ROWS,
            policy: WindowingPolicy::BatchStride,
        }
    }
}

impl PlanParams {
    /// Rows per target window actually used by the policy.
    pub fn effective_window_rows(&self) -> usize {
        match self.policy {
            WindowingPolicy::BatchStride => self.forecast_window_rows,
            WindowingPolicy::RollingSingleStep => 1,
        }
    }

    /// Rows advanced between windows actually used by the policy.
    pub fn effective_stride_rows(&self) -> usize {
        match self.policy {
            WindowingPolicy::BatchStride => self.stride_rows,
            WindowingPolicy::RollingSingleStep => 1,
        }
    }
}

/// Errors from window planning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("no data points in selected region")]
    EmptyRegion,

    #[error("not enough history data: {available} rows before the region, need at least {required}")]
    InsufficientHistory { available: usize, required: usize },

    #[error("invalid window parameter: {0}")]
    InvalidParameter(String),
}

impl PlanError {
    /// Stable machine-readable kind, recorded in run metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            PlanError::EmptyRegion => "empty_region",
            PlanError::InsufficientHistory { .. } => "insufficient_history",
            PlanError::InvalidParameter(_) => "invalid_parameter",
        }
    }
}

// ─── Descriptors ─────────────────────────────────────────────────────

/// Row-index descriptor of one planned window.
///
/// `history` always ends where `target` begins and always starts at row 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowSpec {
    pub index: usize,
    pub history: Range<usize>,
    pub target: Range<usize>,
}

impl WindowSpec {
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn target_len(&self) -> usize {
        self.target.len()
    }
}

// ─── Planning ────────────────────────────────────────────────────────

/// Plan evaluation windows over `timestamps` for the region `[start, end]`.
///
/// Rows after `end` are ignored. The minimum history threshold is at least one
/// row, so every window has a non-empty history.
pub fn plan_windows(
    timestamps: &[NaiveDateTime],
    start: NaiveDateTime,
    end: NaiveDateTime,
    params: &PlanParams,
) -> Result<Vec<WindowSpec>, PlanError> {
    if params.forecast_window_rows == 0 {
        return Err(PlanError::InvalidParameter(
            "forecast_window_rows must be at least 1".into(),
        ));
    }
    if params.stride_rows == 0 {
        return Err(PlanError::InvalidParameter(
            "stride_rows must be at least 1".into(),
        ));
    }

    let n = timestamps.partition_point(|t| *t <= end);
    let first = timestamps[..n].partition_point(|t| *t < start);
    if first >= n {
        return Err(PlanError::EmptyRegion);
    }

    let required = params.min_history_rows.max(1);
    if first < required {
        return Err(PlanError::InsufficientHistory {
            available: first,
            required,
        });
    }

    let specs = match params.policy {
        WindowingPolicy::BatchStride => {
            batch_stride(first, n, params.forecast_window_rows, params.stride_rows)
        }
        WindowingPolicy::RollingSingleStep => rolling_single_step(first, n),
    };

    if specs.is_empty() {
        return Err(PlanError::EmptyRegion);
    }
    Ok(specs)
}

/// Convenience wrapper over a `TimeSeries`.
pub fn plan_series(
    series: &TimeSeries,
    start: NaiveDateTime,
    end: NaiveDateTime,
    params: &PlanParams,
) -> Result<Vec<WindowSpec>, PlanError> {
    plan_windows(series.timestamps(), start, end, params)
}

fn batch_stride(first: usize, n: usize, window: usize, stride: usize) -> Vec<WindowSpec> {
    let count = if n - first >= window {
        (n - first - window) / stride + 1
    } else {
        0
    };
    (0..count)
        .map(|i| {
            let target_start = first + i * stride;
            WindowSpec {
                index: i,
                history: 0..target_start,
                target: target_start..target_start + window,
            }
        })
        .collect()
}

fn rolling_single_step(cutoff: usize, n: usize) -> Vec<WindowSpec> {
    (cutoff + 1..n)
        .enumerate()
        .map(|(i, row)| WindowSpec {
            index: i,
            history: 0..row,
            target: row..row + 1,
        })
        .collect()
}

// ─── Evaluated windows ───────────────────────────────────────────────

/// A window after its forecast came back.
///
/// `actual_values`, `forecast_values` and `target_timestamps` always have the
/// same length; construction goes through [`Window::from_forecast`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Window {
    index: usize,
    history_start: NaiveDateTime,
    history_end: NaiveDateTime,
    target_start: NaiveDateTime,
    target_end: NaiveDateTime,
    actual_values: Vec<f64>,
    forecast_values: Vec<f64>,
    target_timestamps: Vec<NaiveDateTime>,
}

impl Window {
    /// Pair a forecast with the actual target values of `spec`.
    ///
    /// Forecast and actuals are truncated to the shorter of the two. Returns
    /// `None` when nothing is left to compare, or when `spec` does not fit the
    /// series.
    pub fn from_forecast(spec: &WindowSpec, series: &TimeSeries, forecast: Vec<f64>) -> Option<Self> {
        if spec.history.is_empty() || spec.target.end > series.len() {
            return None;
        }
        let timestamps = series.timestamps();
        let actual = &series.values()[spec.target.clone()];

        let len = actual.len().min(forecast.len());
        if len == 0 {
            return None;
        }

        let mut forecast_values = forecast;
        forecast_values.truncate(len);
        let target_timestamps = timestamps[spec.target.start..spec.target.start + len].to_vec();

        Some(Self {
            index: spec.index,
            history_start: timestamps[spec.history.start],
            history_end: timestamps[spec.history.end - 1],
            target_start: timestamps[spec.target.start],
            target_end: target_timestamps[len - 1],
            actual_values: actual[..len].to_vec(),
            forecast_values,
            target_timestamps,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn history_range(&self) -> (NaiveDateTime, NaiveDateTime) {
        (self.history_start, self.history_end)
    }

    pub fn target_range(&self) -> (NaiveDateTime, NaiveDateTime) {
        (self.target_start, self.target_end)
    }

    pub fn actual_values(&self) -> &[f64] {
        &self.actual_values
    }

    pub fn forecast_values(&self) -> &[f64] {
        &self.forecast_values
    }

    pub fn target_timestamps(&self) -> &[NaiveDateTime] {
        &self.target_timestamps
    }

    pub fn len(&self) -> usize {
        self.actual_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actual_values.is_empty()
    }
}
