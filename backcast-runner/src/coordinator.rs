//! Backtest coordinator — one ticker, one run.
//!
//! Normalizes the region onto the series clock, detects frequency, plans
//! windows, dispatches them and aggregates the outcomes into a finished
//! [`BacktestRun`]. Planning failures, panics and an exceeded deadline all
//! finalize the run as failed; only a [`ConfigurationError`] is returned.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use backcast_core::run::{
    META_FINGERPRINT, META_FORECAST_WINDOW_ROWS, META_MODEL, META_STRIDE_ROWS, META_WINDOWING,
};
use backcast_core::{
    aggregate, detect_frequency, plan_windows, Aggregate, BacktestRun, JobFingerprint, PlanParams,
    RunLabels, WindowingPolicy, DEFAULT_MIN_HISTORY_ROWS,
};
use chrono::NaiveDateTime;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{error, info, info_span, Instrument};

use crate::config::ConfigurationError;
use crate::dispatcher::{DispatchConfig, ForecastDispatcher, WindowEvent};
use crate::predictor::{Predictor, PredictorFactory};
use crate::scheduler::BacktestJob;

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub min_history_rows: usize,
    pub windowing: WindowingPolicy,
    pub dispatch: DispatchConfig,
    /// Wall-clock limit for one run. `None` leaves runs bounded only by retries.
    pub run_deadline: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            min_history_rows: DEFAULT_MIN_HISTORY_ROWS,
            windowing: WindowingPolicy::BatchStride,
            dispatch: DispatchConfig::default(),
            run_deadline: None,
        }
    }
}

/// How far a run got before finalization.
enum Stage {
    Evaluated {
        labels: RunLabels,
        cutoff: NaiveDateTime,
        aggregate: Aggregate,
    },
    Rejected {
        kind: &'static str,
        message: String,
    },
}

pub struct BacktestCoordinator {
    factory: Arc<dyn PredictorFactory>,
    config: CoordinatorConfig,
    dispatcher: ForecastDispatcher,
}

impl BacktestCoordinator {
    pub fn new(factory: Arc<dyn PredictorFactory>, config: CoordinatorConfig) -> Self {
        let dispatcher = ForecastDispatcher::new(config.dispatch.clone());
        Self {
            factory,
            config,
            dispatcher,
        }
    }

    /// Forward per-window progress events to `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<WindowEvent>) -> Self {
        self.dispatcher = self.dispatcher.with_events(events);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn plan_params(&self, job: &BacktestJob) -> PlanParams {
        PlanParams {
            forecast_window_rows: job.forecast_window_rows,
            stride_rows: job.stride_rows,
            min_history_rows: self.config.min_history_rows,
            policy: self.config.windowing,
        }
    }

    /// Fingerprint of `job` under this coordinator's windowing policy.
    pub fn fingerprint(&self, job: &BacktestJob) -> JobFingerprint {
        job.fingerprint(self.config.windowing)
    }

    /// Run one backtest. Every outcome except misconfiguration is a run.
    pub async fn run(&self, job: &BacktestJob) -> Result<BacktestRun, ConfigurationError> {
        let (start, end) = job.region.normalize(job.series.zone());
        let mut draft = job.draft(start, end);
        draft.insert_meta(META_FINGERPRINT, self.fingerprint(job).as_str());
        draft.insert_meta(META_WINDOWING, self.config.windowing.name());
        draft.insert_meta(META_MODEL, self.config.dispatch.model.as_str());
        let params = self.plan_params(job);
        draft.insert_meta(META_FORECAST_WINDOW_ROWS, params.effective_window_rows());
        draft.insert_meta(META_STRIDE_ROWS, params.effective_stride_rows());

        let span = info_span!(
            "backtest",
            ticker = %job.asset.symbol,
            run_key = %draft.run_key()
        );

        async move {
            info!(points = job.series.len(), %start, %end, "backtest started");
            let predictor = self.factory.open()?;

            let work = AssertUnwindSafe(self.evaluate(job, start, end, predictor.as_ref()))
                .catch_unwind();
            let finished = match self.config.run_deadline {
                Some(limit) => tokio::time::timeout(limit, work).await.ok(),
                None => Some(work.await),
            };

            predictor.close().await;

            let run = match finished {
                Some(Ok(Ok(Stage::Evaluated {
                    labels,
                    cutoff,
                    aggregate,
                }))) => draft.succeed(labels, cutoff, aggregate),
                Some(Ok(Ok(Stage::Rejected { kind, message }))) => draft.fail(kind, message),
                Some(Ok(Err(config_err))) => {
                    error!(error = %config_err, "configuration error, aborting");
                    return Err(config_err);
                }
                Some(Err(panic)) => draft.fail("panic", panic_message(panic.as_ref())),
                None => draft.fail(
                    "deadline",
                    format!(
                        "run exceeded deadline of {:?}",
                        self.config.run_deadline.unwrap_or_default()
                    ),
                ),
            };

            if run.is_success() {
                info!(
                    windows = run.windows().len(),
                    points = run.total_points(),
                    mape = run.mape(),
                    mae = run.mae(),
                    "backtest completed"
                );
            } else {
                error!(error = run.error().unwrap_or_default(), "backtest failed");
            }
            Ok(run)
        }
        .instrument(span)
        .await
    }

    async fn evaluate(
        &self,
        job: &BacktestJob,
        start: NaiveDateTime,
        end: NaiveDateTime,
        predictor: &dyn Predictor,
    ) -> Result<Stage, ConfigurationError> {
        let series = job.series.as_ref();
        let visible = &series.timestamps()[..series.rows_through(end)];
        let frequency = detect_frequency(visible);
        let params = self.plan_params(job);

        let specs = match plan_windows(visible, start, end, &params) {
            Ok(specs) => specs,
            Err(err) => {
                return Ok(Stage::Rejected {
                    kind: err.kind(),
                    message: err.to_string(),
                })
            }
        };
        let Some(first) = specs.first() else {
            return Ok(Stage::Rejected {
                kind: "empty_region",
                message: "no valid forecast windows could be created".into(),
            });
        };
        let cutoff = visible[first.history.end - 1];

        info!(
            windows = specs.len(),
            frequency = frequency.code(),
            policy = %params.policy,
            "dispatching windows"
        );
        let outcomes = self
            .dispatcher
            .dispatch(&job.asset.symbol, series, &specs, predictor)
            .await?;

        // window sizes live in metadata; labels carry the display horizon
        let labels = RunLabels {
            forecast_window: frequency.horizon(),
            stride: frequency.horizon(),
            frequency: frequency.label().to_string(),
        };
        Ok(Stage::Evaluated {
            labels,
            cutoff,
            aggregate: aggregate(outcomes, specs.len()),
        })
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: unknown payload".to_string()
    }
}
