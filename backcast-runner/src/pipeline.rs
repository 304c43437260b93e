//! Batch pipeline — every asset of every selected class, one scheduler run per class.

use std::sync::Arc;

use backcast_core::EvaluationRegion;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigurationError, PipelineConfig};
use crate::coordinator::BacktestCoordinator;
use crate::predictor::PredictorFactory;
use crate::scheduler::{AssetRef, BacktestJob, JobScheduler, SchedulerReport};
use crate::series_loader::CsvSeriesProvider;
use crate::store::RunStore;

/// Per-invocation overrides of the configured asset classes.
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// `None` runs every configured class.
    pub asset_classes: Option<Vec<String>>,
    pub max_assets: Option<usize>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// First evaluated date. Defaults to the history start.
    pub backtest_start_date: Option<NaiveDate>,
    pub cancel: Option<CancellationToken>,
}

/// Outcome of one asset class.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassReport {
    pub asset_class: String,
    pub report: SchedulerReport,
    /// Symbols whose series could not be loaded, with the reason.
    pub load_failures: Vec<(String, String)>,
}

/// Load dates and evaluation region of one class, validated.
pub fn resolve_dates(
    history_start: NaiveDate,
    end: NaiveDate,
    backtest_start: Option<NaiveDate>,
) -> Result<(NaiveDate, NaiveDate, NaiveDate), ConfigurationError> {
    let backtest_start = backtest_start.unwrap_or(history_start);
    if backtest_start < history_start {
        return Err(ConfigurationError::Invalid(format!(
            "backtest_start_date {backtest_start} must be >= start_date {history_start}"
        )));
    }
    if backtest_start >= end {
        return Err(ConfigurationError::Invalid(format!(
            "backtest_start_date {backtest_start} must be before end_date {end}"
        )));
    }
    Ok((history_start, end, backtest_start))
}

pub async fn run_pipeline(
    config: &PipelineConfig,
    options: &PipelineOptions,
    factory: Arc<dyn PredictorFactory>,
    store: &dyn RunStore,
) -> Result<Vec<ClassReport>, ConfigurationError> {
    let classes: Vec<String> = match &options.asset_classes {
        Some(classes) => classes.clone(),
        None => config.assets.keys().cloned().collect(),
    };

    let coordinator = BacktestCoordinator::new(factory, config.coordinator_config());
    let mut scheduler = JobScheduler::new(config.scheduler_config());
    if let Some(token) = &options.cancel {
        scheduler = scheduler.with_cancellation(token.clone());
    }

    let mut reports = Vec::with_capacity(classes.len());
    for class in classes {
        let settings = config.assets.get(&class).ok_or_else(|| {
            ConfigurationError::Invalid(format!("unknown asset class '{class}'"))
        })?;
        let (history_start, end, backtest_start) = resolve_dates(
            options.start_date.unwrap_or(settings.start_date),
            options.end_date.unwrap_or(settings.end_date),
            options.backtest_start_date,
        )?;

        let provider = CsvSeriesProvider::new(&settings.series_dir);
        let symbols = provider
            .list_symbols(options.max_assets)
            .map_err(|e| ConfigurationError::Invalid(format!("assets.{class}: {e}")))?;
        info!(
            asset_class = %class,
            assets = symbols.len(),
            %history_start,
            %backtest_start,
            %end,
            "loading series"
        );

        let region = EvaluationRegion::from_dates(backtest_start, end);
        let mut jobs = Vec::with_capacity(symbols.len());
        let mut load_failures = Vec::new();
        for symbol in symbols {
            match provider.load(&symbol, history_start, end) {
                Ok(series) => jobs.push(
                    BacktestJob::new(AssetRef::new(&class, &symbol), Arc::new(series), region)
                        .with_window(
                            config.backtest.forecast_window_rows,
                            config.backtest.stride_rows,
                        ),
                ),
                Err(e) => {
                    warn!(asset_class = %class, symbol = %symbol, error = %e, "failed to load series");
                    load_failures.push((symbol, e.to_string()));
                }
            }
        }

        let report = scheduler.run(jobs, &coordinator, store).await?;
        info!(
            asset_class = %class,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            load_failures = load_failures.len(),
            "asset class finished"
        );
        reports.push(ClassReport {
            asset_class: class,
            report,
            load_failures,
        });
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn backtest_start_defaults_to_history_start() {
        let (h, e, b) = resolve_dates(date(2021, 1, 1), date(2025, 12, 31), None).unwrap();
        assert_eq!((h, e, b), (date(2021, 1, 1), date(2025, 12, 31), date(2021, 1, 1)));
    }

    #[test]
    fn backtest_start_must_fall_inside_history() {
        assert!(resolve_dates(date(2021, 1, 1), date(2025, 1, 1), Some(date(2020, 6, 1))).is_err());
        assert!(resolve_dates(date(2021, 1, 1), date(2025, 1, 1), Some(date(2025, 1, 1))).is_err());
        assert!(resolve_dates(date(2021, 1, 1), date(2025, 1, 1), Some(date(2024, 1, 1))).is_ok());
    }
}
