//! Backcast Runner — async orchestration of forecast backtests.
//!
//! - Predictor capability with HTTP and last-value implementations
//! - Forecast dispatcher (bounded concurrency, pacing, retry)
//! - Backtest coordinator (one ticker → one run, failures as runs)
//! - Job scheduler (fleet concurrency, per-job isolation, optional single-flight)
//! - TOML configuration, CSV series provider, JSONL run store, CSV export

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod export;
pub mod pipeline;
pub mod predictor;
pub mod scheduler;
pub mod series_loader;
pub mod single_flight;
pub mod store;

pub use config::{ConfigError, ConfigurationError, PipelineConfig};
pub use coordinator::{BacktestCoordinator, CoordinatorConfig};
pub use dispatcher::{DispatchConfig, DispatchStats, ForecastDispatcher, WindowEvent};
pub use pipeline::{run_pipeline, ClassReport, PipelineOptions};
pub use predictor::{
    build_predictor_factory, ErrorKind, HistoryPoints, Predictor, PredictorError,
    PredictorFactory, TargetScaffold,
};
pub use scheduler::{
    AssetRef, BacktestJob, JobOutcome, JobRunner, JobScheduler, SchedulerConfig, SchedulerReport,
};
pub use series_loader::{CsvSeriesProvider, LoadError};
pub use store::{JsonlRunStore, MemoryRunStore, RunStore, StoreError};
