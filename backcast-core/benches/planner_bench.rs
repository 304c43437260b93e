//! Criterion benchmarks for the planner and aggregator.
//!
//! Benchmarks:
//! 1. Window planning over long daily series (batch and rolling)
//! 2. Aggregation of a full set of completed windows
//! 3. Frequency detection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use backcast_core::{
    aggregate, detect_frequency, plan_windows, PlanParams, SeriesZone, TimeSeries, Window,
    WindowOutcome, WindowingPolicy,
};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_series(n: usize) -> TimeSeries {
    let base = chrono::NaiveDate::from_ymd_opt(2015, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    TimeSeries::from_points(
        (0..n).map(|i| {
            (
                base + chrono::Duration::days(i as i64),
                100.0 + (i as f64 * 0.1).sin() * 10.0,
            )
        }),
        SeriesZone::Naive,
    )
    .unwrap()
}

// ── 1. Planning ──────────────────────────────────────────────────────

fn bench_planner(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_windows");

    for &n in &[1_260usize, 5_000, 20_000] {
        let series = make_series(n);
        let ts = series.timestamps();
        let start = ts[n / 2];
        let end = ts[n - 1];

        for policy in [WindowingPolicy::BatchStride, WindowingPolicy::RollingSingleStep] {
            let params = PlanParams {
                forecast_window_rows: 5,
                stride_rows: 1,
                policy,
                ..PlanParams::default()
            };
            group.bench_with_input(BenchmarkId::new(policy.name(), n), &n, |b, _| {
                b.iter(|| plan_windows(black_box(ts), start, end, &params))
            });
        }
    }

    group.finish();
}

// ── 2. Aggregation ───────────────────────────────────────────────────

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    let n = 5_000;
    let series = make_series(n);
    let ts = series.timestamps();
    let params = PlanParams {
        forecast_window_rows: 5,
        ..PlanParams::default()
    };
    let specs = plan_windows(ts, ts[100], ts[n - 1], &params).unwrap();
    let outcomes: Vec<WindowOutcome> = specs
        .iter()
        .rev()
        .map(|spec| {
            let forecast = series.values()[spec.target.clone()]
                .iter()
                .map(|v| v * 1.01)
                .collect();
            WindowOutcome::completed(Window::from_forecast(spec, &series, forecast).unwrap())
        })
        .collect();

    group.bench_function("reversed_4896_windows", |b| {
        b.iter(|| aggregate(black_box(outcomes.clone()), specs.len()))
    });

    group.finish();
}

// ── 3. Frequency ─────────────────────────────────────────────────────

fn bench_frequency(c: &mut Criterion) {
    let series = make_series(20_000);
    c.bench_function("detect_frequency_20000", |b| {
        b.iter(|| detect_frequency(black_box(series.timestamps())))
    });
}

criterion_group!(benches, bench_planner, bench_aggregate, bench_frequency);
criterion_main!(benches);
