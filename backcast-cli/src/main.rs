//! Backcast CLI — run backtests and query stored results.
//!
//! Commands:
//! - `run` — backtest every asset of the selected classes and persist the runs
//! - `summary` — latest successful run per asset of one class
//! - `detail` — latest successful run of one asset, optionally as window CSV
//! - `prune` — drop stored runs older than a retention window

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use backcast_core::WindowingPolicy;
use backcast_runner::config::PredictorKind;
use backcast_runner::export::{export_run_json, write_windows_csv};
use backcast_runner::{
    build_predictor_factory, run_pipeline, ClassReport, ConfigurationError, JsonlRunStore,
    PipelineConfig, PipelineOptions,
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "backcast", about = "Backcast — forecast backtesting over historical series")]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest every asset of the selected asset classes.
    Run {
        /// Asset class to run, or "all".
        #[arg(long, default_value = "all")]
        asset_class: String,

        /// Maximum assets per class.
        #[arg(long)]
        max_assets: Option<usize>,

        /// History start date (YYYY-MM-DD).
        #[arg(long)]
        start_date: Option<NaiveDate>,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// First evaluated date (YYYY-MM-DD). Defaults to the history start.
        #[arg(long)]
        backtest_start_date: Option<NaiveDate>,

        /// Maximum concurrent backtests.
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Rows forecast per window.
        #[arg(long)]
        forecast_window: Option<usize>,

        /// Rows between successive windows.
        #[arg(long)]
        stride: Option<usize>,

        /// batch_stride or rolling_single_step.
        #[arg(long)]
        windowing: Option<WindowingPolicy>,

        /// http or naive.
        #[arg(long)]
        predictor: Option<PredictorKind>,
    },
    /// Latest successful run per asset of one class.
    Summary {
        #[arg(long)]
        asset_class: String,

        #[arg(long)]
        limit: Option<usize>,
    },
    /// Latest successful run of one asset.
    Detail {
        #[arg(long)]
        asset_class: String,

        #[arg(long)]
        symbol: String,

        /// Maximum windows to include.
        #[arg(long)]
        window_limit: Option<usize>,

        /// Also write the windows as CSV to this path.
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Also write the full run as JSON to this path.
        #[arg(long)]
        json_out: Option<PathBuf>,
    },
    /// Delete stored runs older than the retention window.
    Prune {
        /// Asset class to prune, or "all".
        #[arg(long, default_value = "all")]
        asset_class: String,

        /// Weeks of runs to keep.
        #[arg(long, default_value_t = 12)]
        retain_weeks: u32,
    },
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();
    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(config_err) = e.downcast_ref::<ConfigurationError>() {
                error!(error = %config_err, "configuration error, aborting");
            } else {
                error!("command failed: {e:#}");
            }
            ExitCode::from(1)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            asset_class,
            max_assets,
            start_date,
            end_date,
            backtest_start_date,
            max_concurrent,
            forecast_window,
            stride,
            windowing,
            predictor,
        } => {
            let mut config = config;
            if let Some(jobs) = max_concurrent {
                config.scheduler.max_concurrent_jobs = jobs;
            }
            if let Some(rows) = forecast_window {
                config.backtest.forecast_window_rows = rows;
            }
            if let Some(rows) = stride {
                config.backtest.stride_rows = rows;
            }
            if let Some(policy) = windowing {
                config.backtest.windowing = policy;
            }
            if let Some(kind) = predictor {
                config.predictor.kind = kind;
            }
            config.validate().map_err(ConfigurationError::from)?;

            let asset_classes = if asset_class == "all" {
                None
            } else {
                Some(vec![asset_class])
            };
            let options = PipelineOptions {
                asset_classes,
                max_assets,
                start_date,
                end_date,
                backtest_start_date,
                cancel: Some(cancel_on_ctrl_c()),
            };
            run_cmd(&config, &options).await
        }
        Commands::Summary { asset_class, limit } => {
            let store = JsonlRunStore::new(&config.store.path);
            let summaries = store.summaries(&asset_class, limit)?;
            if summaries.is_empty() {
                bail!("no successful backtests found for asset class '{asset_class}'");
            }
            println!("{}", serde_json::to_string_pretty(&summaries)?);
            Ok(())
        }
        Commands::Detail {
            asset_class,
            symbol,
            window_limit,
            csv,
            json_out,
        } => {
            let store = JsonlRunStore::new(&config.store.path);
            let detail = store.detail(&asset_class, &symbol, window_limit)?;
            if let Some(path) = csv {
                write_windows_csv(&detail.windows, &path)?;
                info!(path = %path.display(), windows = detail.windows.len(), "wrote windows CSV");
            }
            if let Some(path) = json_out {
                std::fs::write(&path, export_run_json(&detail.run)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), run_key = %detail.run.run_key(), "wrote run JSON");
            }
            let body = serde_json::json!({
                "asset": detail.asset,
                "run": detail.run,
                "windows": detail.windows,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        Commands::Prune {
            asset_class,
            retain_weeks,
        } => {
            let class = if asset_class == "all" {
                None
            } else if config.assets.contains_key(&asset_class) {
                Some(asset_class.as_str())
            } else {
                bail!("unknown asset class '{asset_class}'");
            };
            let store = JsonlRunStore::new(&config.store.path);
            let removed = store.prune_older_than(class, retain_weeks).await?;
            println!(
                "[cleanup] {}: removed {removed} runs older than {retain_weeks} weeks",
                class.unwrap_or("all")
            );
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => Ok(PipelineConfig::from_file(path).map_err(ConfigurationError::from)?),
        None => Ok(PipelineConfig::default()),
    }
}

/// Token cancelled on the first Ctrl-C; in-flight jobs finish, no new ones start.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight backtests");
            trigger.cancel();
        }
    });
    token
}

async fn run_cmd(config: &PipelineConfig, options: &PipelineOptions) -> Result<()> {
    let factory = build_predictor_factory(&config.predictor)?;
    let store = JsonlRunStore::new(&config.store.path);

    let reports = run_pipeline(config, options, factory, &store).await?;
    for report in &reports {
        print_report(report);
    }
    println!("Runs stored in: {}", store.path().display());
    Ok(())
}

fn print_report(class: &ClassReport) {
    let report = &class.report;
    println!();
    println!("=== {} ===", class.asset_class);
    println!(
        "{:<10} {:>6}   {:<10} {:>6}   {:<10} {:>6}",
        "Succeeded", report.succeeded, "Failed", report.failed, "Skipped", report.skipped
    );
    if report.cancelled > 0 {
        println!("Cancelled: {}", report.cancelled);
    }
    if report.persist_errors > 0 {
        println!("Persist errors: {}", report.persist_errors);
    }
    for (symbol, reason) in &class.load_failures {
        println!("  load failed  {symbol:<10} {reason}");
    }
}
