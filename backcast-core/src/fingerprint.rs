//! Job fingerprints — deterministic identity of a backtest's inputs.
//!
//! Two jobs with the same ticker, region, window, stride and windowing policy
//! share a fingerprint. Run keys stay unique per invocation regardless.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::window::WindowingPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobFingerprint(pub String);

impl JobFingerprint {
    /// BLAKE3 over a canonical JSON rendering of the inputs.
    pub fn compute(
        ticker: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
        forecast_window_rows: usize,
        stride_rows: usize,
        policy: WindowingPolicy,
    ) -> Self {
        use serde_json::json;

        // json! objects serialize with sorted keys
        let canonical = json!({
            "ticker": ticker,
            "start": start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "end": end.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "forecast_window_rows": forecast_window_rows,
            "stride_rows": stride_rows,
            "windowing": policy.name(),
        });

        let hash = blake3::hash(canonical.to_string().as_bytes());
        Self(hash.to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for JobFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn deterministic() {
        let a = JobFingerprint::compute("AAPL", at(1), at(20), 1, 1, WindowingPolicy::BatchStride);
        let b = JobFingerprint::compute("AAPL", at(1), at(20), 1, 1, WindowingPolicy::BatchStride);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn every_input_changes_the_hash() {
        let base = JobFingerprint::compute("AAPL", at(1), at(20), 1, 1, WindowingPolicy::BatchStride);
        let variants = [
            JobFingerprint::compute("MSFT", at(1), at(20), 1, 1, WindowingPolicy::BatchStride),
            JobFingerprint::compute("AAPL", at(2), at(20), 1, 1, WindowingPolicy::BatchStride),
            JobFingerprint::compute("AAPL", at(1), at(21), 1, 1, WindowingPolicy::BatchStride),
            JobFingerprint::compute("AAPL", at(1), at(20), 2, 1, WindowingPolicy::BatchStride),
            JobFingerprint::compute("AAPL", at(1), at(20), 1, 2, WindowingPolicy::BatchStride),
            JobFingerprint::compute("AAPL", at(1), at(20), 1, 1, WindowingPolicy::RollingSingleStep),
        ];
        for v in &variants {
            assert_ne!(&base, v);
        }
    }
}
