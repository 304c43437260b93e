//! Result aggregation — per-window outcomes into ordered windows and accuracy metrics.
//!
//! Outcomes may arrive in any order; aggregation sorts by the original window
//! index before flattening, so metrics and window order never depend on
//! completion order.

use serde::{Deserialize, Serialize};

use crate::window::Window;

/// Dispatcher output for one planned window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowOutcome {
    pub index: usize,
    pub window: Option<Window>,
}

impl WindowOutcome {
    pub fn completed(window: Window) -> Self {
        Self {
            index: window.index(),
            window: Some(window),
        }
    }

    pub fn no_result(index: usize) -> Self {
        Self {
            index,
            window: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.window.is_some()
    }
}

/// Global accuracy over every surviving point of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    /// Percent, over nonzero actuals only.
    pub mape: f64,
    pub mae: f64,
    pub total_points: usize,
}

/// Mean absolute error. Empty or mismatched input → 0.
pub fn mae(actual: &[f64], forecast: &[f64]) -> f64 {
    if actual.is_empty() || actual.len() != forecast.len() {
        return 0.0;
    }
    let sum: f64 = actual
        .iter()
        .zip(forecast)
        .map(|(a, f)| (a - f).abs())
        .sum();
    sum / actual.len() as f64
}

/// Mean absolute percentage error, in percent.
///
/// Points with a zero actual are excluded from the average. Empty, mismatched,
/// or all-zero input → 0.
pub fn mape(actual: &[f64], forecast: &[f64]) -> f64 {
    if actual.is_empty() || actual.len() != forecast.len() {
        return 0.0;
    }
    let (sum, count) = actual
        .iter()
        .zip(forecast)
        .filter(|(a, _)| **a != 0.0)
        .fold((0.0, 0usize), |(sum, count), (a, f)| {
            (sum + ((a - f) / a).abs() * 100.0, count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Aggregated result of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// Surviving windows in index order.
    pub windows: Vec<Window>,
    pub metrics: AccuracyMetrics,
    pub planned_windows: usize,
    pub dropped_windows: usize,
}

/// Drop no-result outcomes, restore index order and compute metrics.
pub fn aggregate(outcomes: Vec<WindowOutcome>, planned_windows: usize) -> Aggregate {
    let mut windows: Vec<Window> = outcomes.into_iter().filter_map(|o| o.window).collect();
    windows.sort_by_key(Window::index);

    let total_points: usize = windows.iter().map(Window::len).sum();
    let mut actual = Vec::with_capacity(total_points);
    let mut forecast = Vec::with_capacity(total_points);
    for w in &windows {
        actual.extend_from_slice(w.actual_values());
        forecast.extend_from_slice(w.forecast_values());
    }

    let metrics = AccuracyMetrics {
        mape: mape(&actual, &forecast),
        mae: mae(&actual, &forecast),
        total_points,
    };

    Aggregate {
        dropped_windows: planned_windows.saturating_sub(windows.len()),
        windows,
        metrics,
        planned_windows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{SeriesZone, TimeSeries};
    use crate::window::WindowSpec;
    use chrono::{Duration, NaiveDate};

    fn series(values: &[f64]) -> TimeSeries {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        TimeSeries::from_points(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (base + Duration::days(i as i64), *v)),
            SeriesZone::Naive,
        )
        .unwrap()
    }

    fn window(series: &TimeSeries, index: usize, row: usize, forecast: f64) -> Window {
        let spec = WindowSpec {
            index,
            history: 0..row,
            target: row..row + 1,
        };
        Window::from_forecast(&spec, series, vec![forecast]).unwrap()
    }

    #[test]
    fn mape_and_mae_example() {
        assert!((mape(&[100.0, 100.0], &[110.0, 90.0]) - 10.0).abs() < 1e-12);
        assert!((mae(&[100.0, 100.0], &[110.0, 90.0]) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn mape_skips_zero_actuals() {
        // only the 50 → 55 point counts: 10%
        let value = mape(&[0.0, 50.0], &[5.0, 55.0]);
        assert!((value - 10.0).abs() < 1e-12);
        assert_eq!(mape(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn empty_and_mismatched_are_zero() {
        assert_eq!(mae(&[], &[]), 0.0);
        assert_eq!(mape(&[], &[]), 0.0);
        assert_eq!(mae(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(mape(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn aggregate_restores_index_order_and_drops_missing() {
        let s = series(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let outcomes = vec![
            WindowOutcome::completed(window(&s, 2, 4, 5.0)),
            WindowOutcome::no_result(1),
            WindowOutcome::completed(window(&s, 0, 2, 2.0)),
        ];
        let agg = aggregate(outcomes, 3);
        let order: Vec<usize> = agg.windows.iter().map(Window::index).collect();
        assert_eq!(order, vec![0, 2]);
        assert_eq!(agg.planned_windows, 3);
        assert_eq!(agg.dropped_windows, 1);
        assert_eq!(agg.metrics.total_points, 2);
        // actual [3, 5] vs forecast [2, 5]
        assert!((agg.metrics.mae - 0.5).abs() < 1e-12);
    }

    #[test]
    fn aggregate_of_nothing_is_zero() {
        let agg = aggregate(vec![WindowOutcome::no_result(0)], 1);
        assert!(agg.windows.is_empty());
        assert_eq!(agg.metrics, AccuracyMetrics::default());
        assert_eq!(agg.dropped_windows, 1);
    }

    #[test]
    fn total_points_counts_zero_actuals() {
        let s = series(&[1.0, 0.0, 0.0]);
        let agg = aggregate(
            vec![
                WindowOutcome::completed(window(&s, 0, 1, 1.0)),
                WindowOutcome::completed(window(&s, 1, 2, 0.0)),
            ],
            2,
        );
        assert_eq!(agg.metrics.total_points, 2);
        assert_eq!(agg.metrics.mape, 0.0);
        assert!((agg.metrics.mae - 0.5).abs() < 1e-12);
    }
}
