//! Forecast dispatch — one predictor call per planned window.
//!
//! Calls run concurrently under a semaphore of `max_concurrent` permits. Each
//! attempt holds a permit for its pacing delay and the call itself; backoff
//! between retries happens without a permit. Outcomes carry their window
//! index, so completion order is irrelevant to the caller.
//!
//! Per-window failures never escape: exhausted retries and permanent errors
//! both become a no-result outcome. Only a configuration error aborts the
//! dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backcast_core::{TimeSeries, Window, WindowOutcome, WindowSpec};
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::config::{ConfigurationError, DEFAULT_MODEL};
use crate::predictor::{ErrorKind, HistoryPoints, Predictor, TargetScaffold};

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Upper bound on in-flight predictor calls.
    pub max_concurrent: usize,
    /// Pacing delay before every attempt, retries included.
    pub request_delay: Duration,
    /// Total attempts per window, first call included.
    pub max_attempts: u32,
    /// Backoff after the k-th failed attempt is `retry_backoff * k`.
    pub retry_backoff: Duration,
    pub model: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 24,
            request_delay: Duration::from_secs(1),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            model: DEFAULT_MODEL.into(),
        }
    }
}

// ─── Progress ────────────────────────────────────────────────────────

/// Running totals across every dispatch of one dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    attempts: AtomicUsize,
    completed: AtomicUsize,
    no_result: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub attempts: usize,
    pub completed: usize,
    pub no_result: usize,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            no_result: self.no_result.load(Ordering::Relaxed),
        }
    }
}

/// Per-window progress notification.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowEvent {
    Retrying {
        ticker: String,
        index: usize,
        attempt: u32,
        message: String,
    },
    Completed {
        ticker: String,
        index: usize,
        points: usize,
    },
    NoResult {
        ticker: String,
        index: usize,
        attempts: u32,
        message: String,
    },
}

// ─── Dispatcher ──────────────────────────────────────────────────────

pub struct ForecastDispatcher {
    config: DispatchConfig,
    stats: Arc<DispatchStats>,
    events: Option<mpsc::UnboundedSender<WindowEvent>>,
}

impl ForecastDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            stats: Arc::new(DispatchStats::default()),
            events: None,
        }
    }

    /// Send a [`WindowEvent`] per retry and per finished window.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<WindowEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Forecast every window in `specs`, returning one outcome per window in
    /// completion order.
    pub async fn dispatch(
        &self,
        ticker: &str,
        series: &TimeSeries,
        specs: &[WindowSpec],
        predictor: &dyn Predictor,
    ) -> Result<Vec<WindowOutcome>, ConfigurationError> {
        let semaphore = Semaphore::new(self.config.max_concurrent.max(1));

        let mut pending: FuturesUnordered<_> = specs
            .iter()
            .map(|spec| self.run_window(ticker, series, spec, predictor, &semaphore))
            .collect();

        let mut outcomes = Vec::with_capacity(specs.len());
        while let Some(result) = pending.next().await {
            // a configuration error drops every pending window
            outcomes.push(result?);
        }
        Ok(outcomes)
    }

    async fn run_window(
        &self,
        ticker: &str,
        series: &TimeSeries,
        spec: &WindowSpec,
        predictor: &dyn Predictor,
        semaphore: &Semaphore,
    ) -> Result<WindowOutcome, ConfigurationError> {
        let timestamps = series.timestamps();
        let history = HistoryPoints {
            timestamps: &timestamps[spec.history.clone()],
            values: &series.values()[spec.history.clone()],
        };
        let target = TargetScaffold {
            timestamps: &timestamps[spec.target.clone()],
            model: &self.config.model,
        };
        let max_attempts = self.config.max_attempts.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let Ok(_permit) = semaphore.acquire().await else {
                    return Ok(self.no_result(ticker, spec.index, attempt, "dispatch slots closed"));
                };
                tokio::time::sleep(self.config.request_delay).await;
                self.stats.attempts.fetch_add(1, Ordering::Relaxed);
                predictor.forecast(history, target).await
            };

            let err = match result {
                Ok(values) => {
                    return Ok(match Window::from_forecast(spec, series, values) {
                        Some(window) => self.completed(ticker, window),
                        None => self.no_result(ticker, spec.index, attempt, "empty forecast"),
                    });
                }
                Err(err) => err,
            };

            match err.kind {
                ErrorKind::Configuration => {
                    return Err(ConfigurationError::Predictor(err.message));
                }
                ErrorKind::Transient if attempt < max_attempts => {
                    warn!(
                        ticker,
                        window = spec.index,
                        attempt,
                        max_attempts,
                        error = %err.message,
                        "transient predictor failure, retrying"
                    );
                    self.emit(WindowEvent::Retrying {
                        ticker: ticker.to_string(),
                        index: spec.index,
                        attempt,
                        message: err.message,
                    });
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                _ => {
                    warn!(
                        ticker,
                        window = spec.index,
                        attempt,
                        kind = %err.kind,
                        error = %err.message,
                        "window produced no result"
                    );
                    return Ok(self.no_result(ticker, spec.index, attempt, &err.message));
                }
            }
        }
    }

    fn completed(&self, ticker: &str, window: Window) -> WindowOutcome {
        self.stats.completed.fetch_add(1, Ordering::Relaxed);
        debug!(ticker, window = window.index(), points = window.len(), "window completed");
        self.emit(WindowEvent::Completed {
            ticker: ticker.to_string(),
            index: window.index(),
            points: window.len(),
        });
        WindowOutcome::completed(window)
    }

    fn no_result(&self, ticker: &str, index: usize, attempts: u32, message: &str) -> WindowOutcome {
        self.stats.no_result.fetch_add(1, Ordering::Relaxed);
        self.emit(WindowEvent::NoResult {
            ticker: ticker.to_string(),
            index,
            attempts,
            message: message.to_string(),
        });
        WindowOutcome::no_result(index)
    }

    fn emit(&self, event: WindowEvent) {
        if let Some(events) = &self.events {
            // receiver gone means nobody is watching
            let _ = events.send(event);
        }
    }
}
