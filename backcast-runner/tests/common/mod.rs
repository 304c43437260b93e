//! Shared fixtures: daily series and an instrumented fake predictor.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};

use backcast_core::{SeriesZone, TimeSeries};
use backcast_runner::{
    ConfigurationError, DispatchConfig, HistoryPoints, Predictor, PredictorError,
    PredictorFactory, TargetScaffold,
};

pub fn day(i: usize) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + ChronoDuration::days(i as i64)
}

/// `n` daily points valued 100, 101, 102, ...
pub fn daily_series(n: usize) -> Arc<TimeSeries> {
    Arc::new(
        TimeSeries::from_points((0..n).map(|i| (day(i), 100.0 + i as f64)), SeriesZone::Naive)
            .unwrap(),
    )
}

/// Dispatch settings scaled down for tests.
pub fn fast_dispatch(max_concurrent: usize, max_attempts: u32) -> DispatchConfig {
    DispatchConfig {
        max_concurrent,
        request_delay: Duration::from_millis(1),
        max_attempts,
        retry_backoff: Duration::from_millis(2),
        model: "test-model".into(),
    }
}

type Behavior = dyn Fn(NaiveDateTime, u32) -> Result<(), PredictorError> + Send + Sync;

/// Predictor that records concurrency and attempts, then forecasts the last
/// history value for every target unless `behavior` says otherwise.
pub struct FakePredictor {
    pub delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    closed: AtomicUsize,
    attempts: Mutex<HashMap<NaiveDateTime, u32>>,
    behavior: Box<Behavior>,
    delay_for: Option<Box<dyn Fn(NaiveDateTime) -> Duration + Send + Sync>>,
}

impl FakePredictor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            attempts: Mutex::new(HashMap::new()),
            behavior: Box::new(|_, _| Ok(())),
            delay_for: None,
        }
    }

    /// `behavior(first_target_timestamp, attempt)` may fail the call.
    pub fn with_behavior(
        mut self,
        behavior: impl Fn(NaiveDateTime, u32) -> Result<(), PredictorError> + Send + Sync + 'static,
    ) -> Self {
        self.behavior = Box::new(behavior);
        self
    }

    /// Per-window call latency keyed by first target timestamp.
    pub fn with_delay_for(
        mut self,
        delay_for: impl Fn(NaiveDateTime) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.delay_for = Some(Box::new(delay_for));
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, target: NaiveDateTime) -> u32 {
        self.attempts.lock().unwrap().get(&target).copied().unwrap_or(0)
    }

    pub fn factory(self: &Arc<Self>) -> Arc<dyn PredictorFactory> {
        let shared = Arc::clone(self);
        Arc::new(move || -> Result<Arc<dyn Predictor>, ConfigurationError> {
            Ok(Arc::clone(&shared) as Arc<dyn Predictor>)
        })
    }
}

#[async_trait]
impl Predictor for FakePredictor {
    fn name(&self) -> &str {
        "fake"
    }

    async fn forecast(
        &self,
        history: HistoryPoints<'_>,
        target: TargetScaffold<'_>,
    ) -> Result<Vec<f64>, PredictorError> {
        let first = target.timestamps[0];
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let entry = attempts.entry(first).or_insert(0);
            *entry += 1;
            *entry
        };
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_for.as_ref().map_or(self.delay, |f| f(first));
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        (self.behavior)(first, attempt)?;
        let last = history.values[history.values.len() - 1];
        Ok(vec![last; target.timestamps.len()])
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}
