//! Backtest run records — the uniform envelope for success and failure.
//!
//! A run starts as a [`RunDraft`] (identity, region, metadata) and is finalized
//! exactly once into a [`BacktestRun`] via `succeed` or `fail`. Both consume the
//! draft, so a finished run can never be finalized twice or mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::metrics::Aggregate;
use crate::window::Window;

/// Version of the persisted run layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Label used for every descriptive field of a failed run.
pub const UNKNOWN_LABEL: &str = "unknown";

// Metadata keys
pub const META_CUTOFF_DATE: &str = "cutoff_date";
pub const META_WINDOWS: &str = "windows";
pub const META_PLANNED_WINDOWS: &str = "planned_windows";
pub const META_DROPPED_WINDOWS: &str = "dropped_windows";
pub const META_RUN_WEEK: &str = "run_week";
pub const META_FINGERPRINT: &str = "fingerprint";
pub const META_WINDOWING: &str = "windowing";
pub const META_FORECAST_WINDOW_ROWS: &str = "forecast_window_rows";
pub const META_STRIDE_ROWS: &str = "stride_rows";
pub const META_MODEL: &str = "model";
pub const META_ERROR: &str = "error";
pub const META_ERROR_KIND: &str = "error_kind";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Globally unique run identifier: `{asset_class}:{ticker}:{uuid}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey(pub String);

impl RunKey {
    /// Fresh key. Never reused, even for identical inputs.
    pub fn generate(asset_class: &str, ticker: &str) -> Self {
        Self(format!("{asset_class}:{ticker}:{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptive labels of a successful run, e.g. `1D` / `1D` / `day`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLabels {
    pub forecast_window: String,
    pub stride: String,
    pub frequency: String,
}

impl RunLabels {
    pub fn unknown() -> Self {
        Self {
            forecast_window: UNKNOWN_LABEL.into(),
            stride: UNKNOWN_LABEL.into(),
            frequency: UNKNOWN_LABEL.into(),
        }
    }
}

/// ISO week of `at`, formatted `YYYY-Www`.
pub fn run_week(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

// ─── Draft ───────────────────────────────────────────────────────────

/// A run in progress. Owned by the coordinator until finalized.
#[derive(Debug, Clone)]
pub struct RunDraft {
    run_key: RunKey,
    asset_class: String,
    ticker: String,
    start_date: NaiveDateTime,
    end_date: NaiveDateTime,
    created_at: DateTime<Utc>,
    metadata: BTreeMap<String, Value>,
}

impl RunDraft {
    /// Start a run with a freshly generated key. Region bounds are on the series clock.
    pub fn new(
        asset_class: impl Into<String>,
        ticker: impl Into<String>,
        start_date: NaiveDateTime,
        end_date: NaiveDateTime,
    ) -> Self {
        let asset_class = asset_class.into();
        let ticker = ticker.into();
        Self {
            run_key: RunKey::generate(&asset_class, &ticker),
            asset_class,
            ticker,
            start_date,
            end_date,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn run_key(&self) -> &RunKey {
        &self.run_key
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn insert_meta(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Finalize as a success.
    ///
    /// `cutoff_date` is the last history timestamp before the first window.
    pub fn succeed(
        mut self,
        labels: RunLabels,
        cutoff_date: NaiveDateTime,
        aggregate: Aggregate,
    ) -> BacktestRun {
        self.insert_meta(META_CUTOFF_DATE, format_timestamp(cutoff_date));
        self.insert_meta(META_WINDOWS, aggregate.windows.len());
        self.insert_meta(META_PLANNED_WINDOWS, aggregate.planned_windows);
        self.insert_meta(META_DROPPED_WINDOWS, aggregate.dropped_windows);

        let metrics = aggregate.metrics;
        self.finish(
            RunStatus::Success,
            labels,
            Some(cutoff_date),
            aggregate.windows,
            metrics.mape,
            metrics.mae,
            metrics.total_points,
        )
    }

    /// Finalize as a failure with a human-readable explanation.
    pub fn fail(mut self, error_kind: &str, message: impl Into<String>) -> BacktestRun {
        self.insert_meta(META_ERROR, message.into());
        self.insert_meta(META_ERROR_KIND, error_kind);
        self.finish(
            RunStatus::Failed,
            RunLabels::unknown(),
            None,
            Vec::new(),
            0.0,
            0.0,
            0,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        mut self,
        status: RunStatus,
        labels: RunLabels,
        cutoff_date: Option<NaiveDateTime>,
        windows: Vec<Window>,
        mape: f64,
        mae: f64,
        total_points: usize,
    ) -> BacktestRun {
        self.insert_meta(META_RUN_WEEK, run_week(self.created_at));
        BacktestRun {
            schema_version: SCHEMA_VERSION,
            run_key: self.run_key,
            asset_class: self.asset_class,
            ticker: self.ticker,
            start_date: self.start_date,
            end_date: self.end_date,
            cutoff_date,
            forecast_window_label: labels.forecast_window,
            stride_label: labels.stride,
            frequency_label: labels.frequency,
            windows,
            mape,
            mae,
            total_points,
            status,
            metadata: self.metadata,
            created_at: self.created_at,
        }
    }
}

fn format_timestamp(t: NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S").to_string()
}

// ─── Finished run ────────────────────────────────────────────────────

/// A finalized backtest. Read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    schema_version: u32,
    run_key: RunKey,
    asset_class: String,
    ticker: String,
    start_date: NaiveDateTime,
    end_date: NaiveDateTime,
    cutoff_date: Option<NaiveDateTime>,
    forecast_window_label: String,
    stride_label: String,
    frequency_label: String,
    windows: Vec<Window>,
    mape: f64,
    mae: f64,
    total_points: usize,
    status: RunStatus,
    metadata: BTreeMap<String, Value>,
    created_at: DateTime<Utc>,
}

impl BacktestRun {
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn run_key(&self) -> &RunKey {
        &self.run_key
    }

    pub fn asset_class(&self) -> &str {
        &self.asset_class
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn region(&self) -> (NaiveDateTime, NaiveDateTime) {
        (self.start_date, self.end_date)
    }

    pub fn cutoff_date(&self) -> Option<NaiveDateTime> {
        self.cutoff_date
    }

    pub fn forecast_window_label(&self) -> &str {
        &self.forecast_window_label
    }

    pub fn stride_label(&self) -> &str {
        &self.stride_label
    }

    pub fn frequency_label(&self) -> &str {
        &self.frequency_label
    }

    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn mape(&self) -> f64 {
        self.mape
    }

    pub fn mae(&self) -> f64 {
        self.mae
    }

    pub fn total_points(&self) -> usize {
        self.total_points
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// String metadata value, if present.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Failure explanation, if the run failed.
    pub fn error(&self) -> Option<&str> {
        self.meta_str(META_ERROR)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
