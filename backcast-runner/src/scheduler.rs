//! Job scheduler — many tickers, bounded fleet concurrency, per-job isolation.
//!
//! Jobs below the point threshold are skipped before any work. The rest run
//! through a [`JobRunner`] with at most `max_concurrent_jobs` in flight. A
//! failed or panicking job becomes a failed run and never disturbs its
//! siblings; only a [`ConfigurationError`] stops the scheduler.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use backcast_core::{
    BacktestRun, EvaluationRegion, JobFingerprint, RunDraft, RunKey, RunStatus, TimeSeries,
    WindowingPolicy,
};
use futures_util::{stream, FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ConfigurationError;
use crate::coordinator::{panic_message, BacktestCoordinator};
use crate::single_flight::SingleFlight;
use crate::store::RunStore;

// ─── Jobs ────────────────────────────────────────────────────────────

/// Identity of the asset a run belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetRef {
    pub asset_class: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AssetRef {
    pub fn new(asset_class: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            asset_class: asset_class.into(),
            symbol: symbol.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// One ticker's backtest request.
#[derive(Debug, Clone)]
pub struct BacktestJob {
    pub asset: AssetRef,
    pub series: Arc<TimeSeries>,
    pub region: EvaluationRegion,
    pub forecast_window_rows: usize,
    pub stride_rows: usize,
}

impl BacktestJob {
    pub fn new(asset: AssetRef, series: Arc<TimeSeries>, region: EvaluationRegion) -> Self {
        Self {
            asset,
            series,
            region,
            forecast_window_rows: 1,
            stride_rows: 1,
        }
    }

    pub fn with_window(mut self, forecast_window_rows: usize, stride_rows: usize) -> Self {
        self.forecast_window_rows = forecast_window_rows;
        self.stride_rows = stride_rows;
        self
    }

    /// Fresh run draft over this job's region, normalized bounds supplied.
    pub fn draft(&self, start: chrono::NaiveDateTime, end: chrono::NaiveDateTime) -> RunDraft {
        RunDraft::new(&self.asset.asset_class, &self.asset.symbol, start, end)
    }

    pub fn fingerprint(&self, policy: WindowingPolicy) -> JobFingerprint {
        let (start, end) = self.region.normalize(self.series.zone());
        JobFingerprint::compute(
            &self.asset.symbol,
            start,
            end,
            self.forecast_window_rows,
            self.stride_rows,
            policy,
        )
    }
}

/// Executes one job. Implemented by [`BacktestCoordinator`].
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &BacktestJob) -> Result<BacktestRun, ConfigurationError>;

    fn fingerprint(&self, job: &BacktestJob) -> JobFingerprint {
        job.fingerprint(WindowingPolicy::BatchStride)
    }
}

#[async_trait]
impl JobRunner for BacktestCoordinator {
    async fn run(&self, job: &BacktestJob) -> Result<BacktestRun, ConfigurationError> {
        BacktestCoordinator::run(self, job).await
    }

    fn fingerprint(&self, job: &BacktestJob) -> JobFingerprint {
        BacktestCoordinator::fingerprint(self, job)
    }
}

// ─── Report ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub max_concurrent_jobs: usize,
    /// Jobs whose series has fewer points are skipped.
    pub skip_below_points: usize,
    /// Never run two jobs with the same fingerprint at once.
    pub dedupe_in_flight: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            skip_below_points: 30,
            dedupe_in_flight: false,
        }
    }
}

/// What happened to one input job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        symbol: String,
        run_key: RunKey,
        status: RunStatus,
    },
    Skipped {
        symbol: String,
        points: usize,
    },
    Cancelled {
        symbol: String,
    },
}

impl JobOutcome {
    pub fn symbol(&self) -> &str {
        match self {
            JobOutcome::Completed { symbol, .. }
            | JobOutcome::Skipped { symbol, .. }
            | JobOutcome::Cancelled { symbol } => symbol,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// One entry per input job, in input order.
    pub outcomes: Vec<JobOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
    pub persist_errors: usize,
}

impl SchedulerReport {
    fn from_outcomes(outcomes: Vec<JobOutcome>, persist_errors: usize) -> Self {
        let mut report = SchedulerReport {
            persist_errors,
            ..SchedulerReport::default()
        };
        for outcome in &outcomes {
            match outcome {
                JobOutcome::Completed { status: RunStatus::Success, .. } => report.succeeded += 1,
                JobOutcome::Completed { status: RunStatus::Failed, .. } => report.failed += 1,
                JobOutcome::Skipped { .. } => report.skipped += 1,
                JobOutcome::Cancelled { .. } => report.cancelled += 1,
            }
        }
        report.outcomes = outcomes;
        report
    }
}

// ─── Scheduler ───────────────────────────────────────────────────────

pub struct JobScheduler {
    config: SchedulerConfig,
    single_flight: SingleFlight,
    cancel: Option<CancellationToken>,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            single_flight: SingleFlight::new(),
            cancel: None,
        }
    }

    /// Stop launching new jobs once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// Run every job, persisting each finished run to `store`.
    pub async fn run<R, S>(
        &self,
        jobs: Vec<BacktestJob>,
        runner: &R,
        store: &S,
    ) -> Result<SchedulerReport, ConfigurationError>
    where
        R: JobRunner + ?Sized,
        S: RunStore + ?Sized,
    {
        let total = jobs.len();
        let mut slots: Vec<Option<JobOutcome>> = vec![None; total];
        let mut runnable = Vec::with_capacity(total);

        for (pos, job) in jobs.iter().enumerate() {
            let points = job.series.len();
            if points < self.config.skip_below_points {
                info!(
                    symbol = %job.asset.symbol,
                    points,
                    required = self.config.skip_below_points,
                    "skipping job: not enough data"
                );
                slots[pos] = Some(JobOutcome::Skipped {
                    symbol: job.asset.symbol.clone(),
                    points,
                });
            } else {
                runnable.push((pos, job));
            }
        }

        info!(
            total,
            runnable = runnable.len(),
            max_concurrent = self.config.max_concurrent_jobs,
            "scheduling backtests"
        );

        let mut finished = stream::iter(runnable)
            .map(|(pos, job)| async move { (pos, self.run_and_persist(job, runner, store).await) })
            .buffer_unordered(self.config.max_concurrent_jobs.max(1));

        let mut persist_errors = 0;
        let mut done = 0;
        while let Some((pos, result)) = finished.next().await {
            let (outcome, persisted) = result?;
            if !persisted {
                persist_errors += 1;
            }
            done += 1;
            info!(done, total, symbol = outcome.symbol(), "job finished");
            slots[pos] = Some(outcome);
        }

        Ok(SchedulerReport::from_outcomes(
            slots.into_iter().flatten().collect(),
            persist_errors,
        ))
    }

    /// Outcome of one job and whether its run was stored.
    async fn run_and_persist<R, S>(
        &self,
        job: &BacktestJob,
        runner: &R,
        store: &S,
    ) -> Result<(JobOutcome, bool), ConfigurationError>
    where
        R: JobRunner + ?Sized,
        S: RunStore + ?Sized,
    {
        let symbol = job.asset.symbol.clone();
        if self.is_cancelled() {
            return Ok((JobOutcome::Cancelled { symbol }, true));
        }

        let _flight = if self.config.dedupe_in_flight {
            Some(self.single_flight.acquire(&runner.fingerprint(job)).await)
        } else {
            None
        };

        let run = match AssertUnwindSafe(runner.run(job)).catch_unwind().await {
            Ok(result) => result?,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(symbol = %symbol, error = %message, "job panicked");
                let (start, end) = job.region.normalize(job.series.zone());
                job.draft(start, end).fail("panic", message)
            }
        };

        let outcome = JobOutcome::Completed {
            symbol,
            run_key: run.run_key().clone(),
            status: run.status(),
        };
        let persisted = match store.persist(&job.asset, run).await {
            Ok(()) => true,
            Err(e) => {
                warn!(symbol = outcome.symbol(), error = %e, "failed to persist run");
                false
            }
        };
        Ok((outcome, persisted))
    }
}
