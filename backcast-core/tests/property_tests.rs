//! Property tests for metric and planner invariants.
//!
//! Uses proptest to verify:
//! 1. Metrics are non-negative and zero exactly on perfect forecasts
//! 2. The planner is deterministic and emits windows in target order
//! 3. Every batch window has full-length targets and contiguous history
//! 4. Aggregation order does not depend on outcome arrival order

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;

use backcast_core::{
    aggregate, mae, mape, plan_windows, PlanParams, SeriesZone, TimeSeries, Window,
    WindowOutcome, WindowingPolicy,
};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_pairs() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((-1000.0..1000.0_f64, -1000.0..1000.0_f64), 0..64)
}

fn daily(n: usize) -> Vec<NaiveDateTime> {
    let base = NaiveDate::from_ymd_opt(2021, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    (0..n).map(|i| base + Duration::days(i as i64)).collect()
}

fn arb_plan() -> impl Strategy<Value = (usize, usize, usize, usize, usize)> {
    // (series length, region start row, window rows, stride rows, min history)
    (20usize..200).prop_flat_map(|n| (Just(n), 0..n, 1usize..8, 1usize..8, 0usize..15))
}

// ── 1. Metrics ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn metrics_are_non_negative(pairs in arb_pairs()) {
        let (actual, forecast): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
        prop_assert!(mae(&actual, &forecast) >= 0.0);
        prop_assert!(mape(&actual, &forecast) >= 0.0);
    }

    #[test]
    fn perfect_forecast_scores_zero(values in prop::collection::vec(-1000.0..1000.0_f64, 0..64)) {
        prop_assert_eq!(mae(&values, &values), 0.0);
        prop_assert_eq!(mape(&values, &values), 0.0);
    }

    #[test]
    fn any_miss_on_nonzero_actual_is_positive(
        values in prop::collection::vec(1.0..1000.0_f64, 1..32),
        miss in 0usize..32,
        delta in 0.5..50.0_f64,
    ) {
        let mut forecast = values.clone();
        let i = miss % values.len();
        forecast[i] += delta;
        prop_assert!(mae(&values, &forecast) > 0.0);
        prop_assert!(mape(&values, &forecast) > 0.0);
    }
}

// ── 2/3. Planner ─────────────────────────────────────────────────────

proptest! {
    #[test]
    fn planner_is_deterministic((n, start_row, w, s, min) in arb_plan()) {
        let ts = daily(n);
        let params = PlanParams {
            forecast_window_rows: w,
            stride_rows: s,
            min_history_rows: min,
            policy: WindowingPolicy::BatchStride,
        };
        let a = plan_windows(&ts, ts[start_row], ts[n - 1], &params);
        let b = plan_windows(&ts, ts[start_row], ts[n - 1], &params);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn batch_windows_are_well_formed((n, start_row, w, s, min) in arb_plan()) {
        let ts = daily(n);
        let params = PlanParams {
            forecast_window_rows: w,
            stride_rows: s,
            min_history_rows: min,
            policy: WindowingPolicy::BatchStride,
        };
        if let Ok(specs) = plan_windows(&ts, ts[start_row], ts[n - 1], &params) {
            prop_assert!(!specs.is_empty());
            prop_assert_eq!(specs[0].target.start, start_row);
            for (i, spec) in specs.iter().enumerate() {
                prop_assert_eq!(spec.index, i);
                prop_assert_eq!(spec.target.len(), w);
                prop_assert_eq!(spec.history.start, 0);
                prop_assert_eq!(spec.history.end, spec.target.start);
                prop_assert!(spec.history.len() >= min.max(1));
                prop_assert!(spec.target.end <= n);
            }
            for pair in specs.windows(2) {
                prop_assert_eq!(pair[1].target.start - pair[0].target.start, s);
            }
            // no further full window would fit
            let last = specs.last().unwrap();
            prop_assert!(last.target.start + s + w > n);
        }
    }

    #[test]
    fn rolling_emits_one_window_per_row_after_cutoff((n, start_row, _w, _s, min) in arb_plan()) {
        let ts = daily(n);
        let params = PlanParams {
            min_history_rows: min,
            policy: WindowingPolicy::RollingSingleStep,
            ..PlanParams::default()
        };
        if let Ok(specs) = plan_windows(&ts, ts[start_row], ts[n - 1], &params) {
            prop_assert_eq!(specs.len(), n - start_row - 1);
            prop_assert!(specs.iter().all(|s| s.target.len() == 1));
        }
    }
}

// ── 4. Aggregation order ─────────────────────────────────────────────

proptest! {
    #[test]
    fn aggregation_ignores_arrival_order(seed in any::<u64>(), n in 12usize..60) {
        let ts = daily(n);
        let values: Vec<f64> = (0..n).map(|i| 50.0 + (i as f64 * 0.7).sin() * 10.0).collect();
        let series = TimeSeries::new(ts.clone(), values, SeriesZone::Naive).unwrap();
        let params = PlanParams { min_history_rows: 10, ..PlanParams::default() };
        let specs = plan_windows(&ts, ts[10], ts[n - 1], &params).unwrap();

        let mut outcomes: Vec<WindowOutcome> = specs
            .iter()
            .map(|spec| {
                let forecast = vec![series.values()[spec.target.start] + 1.0];
                WindowOutcome::completed(Window::from_forecast(spec, &series, forecast).unwrap())
            })
            .collect();
        // deterministic shuffle driven by the seed
        let len = outcomes.len();
        for i in (1..len).rev() {
            let j = (seed.wrapping_mul(i as u64 + 7) % (i as u64 + 1)) as usize;
            outcomes.swap(i, j);
        }

        let agg = aggregate(outcomes, specs.len());
        let starts: Vec<NaiveDateTime> = agg.windows.iter().map(|w| w.target_range().0).collect();
        prop_assert!(starts.windows(2).all(|p| p[0] <= p[1]));
        prop_assert_eq!(agg.metrics.total_points, specs.len());
        prop_assert!((agg.metrics.mae - 1.0).abs() < 1e-9);
    }
}
