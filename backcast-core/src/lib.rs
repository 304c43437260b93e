//! Backcast Core — the synchronous domain of forecast backtesting.
//!
//! This crate contains everything that does not touch the network:
//! - Time series and evaluation-region normalization
//! - Sampling-cadence detection
//! - Window planning (batch stride and rolling single-step policies)
//! - Accuracy aggregation (MAE, MAPE over nonzero actuals)
//! - Run records, run keys and job fingerprints

pub mod fingerprint;
pub mod frequency;
pub mod metrics;
pub mod run;
pub mod series;
pub mod window;

pub use fingerprint::JobFingerprint;
pub use frequency::{detect_frequency, Frequency};
pub use metrics::{aggregate, mae, mape, AccuracyMetrics, Aggregate, WindowOutcome};
pub use run::{BacktestRun, RunDraft, RunKey, RunLabels, RunStatus};
pub use series::{EvaluationRegion, RegionBound, SeriesError, SeriesZone, TimeSeries};
pub use window::{
    plan_series, plan_windows, PlanError, PlanParams, Window, WindowSpec, WindowingPolicy,
    DEFAULT_MIN_HISTORY_ROWS,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything handed across tasks is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<TimeSeries>();
        require_sync::<TimeSeries>();
        require_send::<WindowSpec>();
        require_sync::<WindowSpec>();
        require_send::<Window>();
        require_sync::<Window>();
        require_send::<WindowOutcome>();
        require_sync::<WindowOutcome>();
        require_send::<BacktestRun>();
        require_sync::<BacktestRun>();
        require_send::<RunDraft>();
        require_send::<JobFingerprint>();
        require_sync::<JobFingerprint>();
        require_send::<PlanError>();
        require_sync::<PlanError>();
    }
}
