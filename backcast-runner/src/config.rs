//! Pipeline configuration — TOML file with every section defaulted.
//!
//! ```toml
//! [backtest]
//! forecast_window_rows = 1
//! windowing = "batch_stride"
//!
//! [predictor]
//! kind = "http"
//! base_url = "https://forecast.example.com/v2"
//!
//! [assets.sp500]
//! series_dir = "data/sp500"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use backcast_core::{PlanParams, WindowingPolicy, DEFAULT_MIN_HISTORY_ROWS};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::CoordinatorConfig;
use crate::dispatcher::DispatchConfig;
use crate::scheduler::SchedulerConfig;

/// Default model id sent to the forecaster.
pub const DEFAULT_MODEL: &str = "sfm-moe-v1";

/// Asset classes configured when the file names none.
pub const DEFAULT_ASSET_CLASSES: [&str; 4] = ["sp500", "crypto", "forex", "macro"];

// ─── Errors ──────────────────────────────────────────────────────────

/// Errors loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Fatal, pipeline-wide misconfiguration. Never retried, never job-isolated.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing predictor credential: environment variable {var} is not set")]
    MissingCredential { var: String },

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("predictor rejected configuration: {0}")]
    Predictor(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ─── Sections ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestSettings {
    pub forecast_window_rows: usize,
    pub stride_rows: usize,
    pub min_history_rows: usize,
    /// Jobs with fewer loaded points are skipped, not run.
    pub skip_below_points: usize,
    pub windowing: WindowingPolicy,
}

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            forecast_window_rows: 1,
            stride_rows: 1,
            min_history_rows: DEFAULT_MIN_HISTORY_ROWS,
            skip_below_points: 30,
            windowing: WindowingPolicy::BatchStride,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub max_concurrent: usize,
    pub request_delay_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 24,
            request_delay_ms: 1_000,
            max_attempts: 3,
            retry_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub max_concurrent_jobs: usize,
    pub dedupe_in_flight: bool,
    pub run_deadline_secs: Option<u64>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 5,
            dedupe_in_flight: false,
            run_deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorKind {
    #[default]
    Http,
    Naive,
}

impl std::str::FromStr for PredictorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(PredictorKind::Http),
            "naive" => Ok(PredictorKind::Naive),
            other => Err(format!("unknown predictor kind '{other}' (expected http or naive)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorSettings {
    pub kind: PredictorKind,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for PredictorSettings {
    fn default() -> Self {
        Self {
            kind: PredictorKind::Http,
            base_url: "http://127.0.0.1:8000".into(),
            model: DEFAULT_MODEL.into(),
            api_key_env: "FORECAST_API_KEY".into(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("results/runs.jsonl"),
        }
    }
}

/// One asset class: where its series live and which dates to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetClassSettings {
    pub series_dir: PathBuf,
    #[serde(default = "default_start_date")]
    pub start_date: NaiveDate,
    #[serde(default = "default_end_date")]
    pub end_date: NaiveDate,
}

impl AssetClassSettings {
    pub fn new(series_dir: impl Into<PathBuf>) -> Self {
        Self {
            series_dir: series_dir.into(),
            start_date: default_start_date(),
            end_date: default_end_date(),
        }
    }
}

fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn default_end_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 31).unwrap_or(NaiveDate::MAX)
}

fn default_assets() -> BTreeMap<String, AssetClassSettings> {
    DEFAULT_ASSET_CLASSES
        .iter()
        .map(|class| {
            (
                class.to_string(),
                AssetClassSettings::new(Path::new("data").join(class)),
            )
        })
        .collect()
}

// ─── Top level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub backtest: BacktestSettings,
    pub dispatch: DispatchSettings,
    pub scheduler: SchedulerSettings,
    pub predictor: PredictorSettings,
    pub store: StoreSettings,
    pub assets: BTreeMap<String, AssetClassSettings>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            backtest: BacktestSettings::default(),
            dispatch: DispatchSettings::default(),
            scheduler: SchedulerSettings::default(),
            predictor: PredictorSettings::default(),
            store: StoreSettings::default(),
            assets: default_assets(),
        }
    }
}

impl PipelineConfig {
    /// Load and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate TOML text. Missing sections take their defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.backtest.forecast_window_rows, "backtest.forecast_window_rows"),
            (self.backtest.stride_rows, "backtest.stride_rows"),
            (self.dispatch.max_concurrent, "dispatch.max_concurrent"),
            (self.dispatch.max_attempts as usize, "dispatch.max_attempts"),
            (self.scheduler.max_concurrent_jobs, "scheduler.max_concurrent_jobs"),
        ];
        if let Some((_, name)) = checks.iter().find(|(value, _)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be at least 1")));
        }
        for (class, settings) in &self.assets {
            if settings.start_date > settings.end_date {
                return Err(ConfigError::Invalid(format!(
                    "assets.{class}: start_date {} is after end_date {}",
                    settings.start_date, settings.end_date
                )));
            }
        }
        Ok(())
    }

    pub fn plan_params(&self) -> PlanParams {
        PlanParams {
            forecast_window_rows: self.backtest.forecast_window_rows,
            stride_rows: self.backtest.stride_rows,
            min_history_rows: self.backtest.min_history_rows,
            policy: self.backtest.windowing,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_concurrent: self.dispatch.max_concurrent,
            request_delay: Duration::from_millis(self.dispatch.request_delay_ms),
            max_attempts: self.dispatch.max_attempts,
            retry_backoff: Duration::from_millis(self.dispatch.retry_backoff_ms),
            model: self.predictor.model.clone(),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            min_history_rows: self.backtest.min_history_rows,
            windowing: self.backtest.windowing,
            dispatch: self.dispatch_config(),
            run_deadline: self.scheduler.run_deadline_secs.map(Duration::from_secs),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_jobs: self.scheduler.max_concurrent_jobs,
            skip_below_points: self.backtest.skip_below_points,
            dedupe_in_flight: self.scheduler.dedupe_in_flight,
        }
    }
}
