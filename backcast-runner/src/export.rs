//! Export — run JSON and per-point window CSV.
//!
//! The CSV has one row per target point:
//! `window,history_start,history_end,target_timestamp,actual,forecast`.

use std::path::Path;

use anyhow::{Context, Result};
use backcast_core::{BacktestRun, Window};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Serialize a run to pretty JSON.
pub fn export_run_json(run: &BacktestRun) -> Result<String> {
    serde_json::to_string_pretty(run).context("failed to serialize BacktestRun to JSON")
}

/// Flatten windows into one CSV row per target point.
pub fn export_windows_csv(windows: &[Window]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "window",
        "history_start",
        "history_end",
        "target_timestamp",
        "actual",
        "forecast",
    ])?;

    for w in windows {
        let (history_start, history_end) = w.history_range();
        let history_start = history_start.format(TIMESTAMP_FORMAT).to_string();
        let history_end = history_end.format(TIMESTAMP_FORMAT).to_string();
        let points = w
            .target_timestamps()
            .iter()
            .zip(w.actual_values())
            .zip(w.forecast_values());
        for ((ts, actual), forecast) in points {
            wtr.write_record([
                &w.index().to_string(),
                &history_start,
                &history_end,
                &ts.format(TIMESTAMP_FORMAT).to_string(),
                &format!("{actual:.6}"),
                &format!("{forecast:.6}"),
            ])?;
        }
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Write [`export_windows_csv`] output to `path`, creating parent directories.
pub fn write_windows_csv(windows: &[Window], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let csv = export_windows_csv(windows)?;
    std::fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))
}
