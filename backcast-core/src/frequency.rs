//! Sampling-cadence detection.
//!
//! Classifies a series by the median gap between consecutive timestamps,
//! floored to whole days: ≤1 daily, ≤7 weekly, ≤45 monthly, ≤100 quarterly,
//! otherwise annual. Fewer than two timestamps default to daily.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Detected sampling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl Frequency {
    /// Short frequency code (D, W, M, Q, A).
    pub fn code(&self) -> &'static str {
        match self {
            Frequency::Daily => "D",
            Frequency::Weekly => "W",
            Frequency::Monthly => "M",
            Frequency::Quarterly => "Q",
            Frequency::Annual => "A",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Frequency::Daily => "day",
            Frequency::Weekly => "week",
            Frequency::Monthly => "month",
            Frequency::Quarterly => "quarter",
            Frequency::Annual => "year",
        }
    }

    /// Unit suffix used in horizon labels.
    pub fn unit(&self) -> char {
        match self {
            Frequency::Daily => 'D',
            Frequency::Weekly => 'W',
            Frequency::Monthly => 'M',
            Frequency::Quarterly => 'Q',
            Frequency::Annual => 'Y',
        }
    }

    /// Display horizon of a single row ("1D", "1W", "1M", "1Q", "1Y").
    pub fn horizon(&self) -> String {
        format!("1{}", self.unit())
    }

    fn from_days(days: f64) -> Self {
        if days <= 1.0 {
            Frequency::Daily
        } else if days <= 7.0 {
            Frequency::Weekly
        } else if days <= 45.0 {
            Frequency::Monthly
        } else if days <= 100.0 {
            Frequency::Quarterly
        } else {
            Frequency::Annual
        }
    }
}

/// Detect the cadence of an ascending timestamp sequence. Total: never fails.
pub fn detect_frequency(timestamps: &[NaiveDateTime]) -> Frequency {
    if timestamps.len() < 2 {
        return Frequency::Daily;
    }

    let mut deltas: Vec<i64> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds())
        .collect();
    deltas.sort_unstable();

    let mid = deltas.len() / 2;
    let median_secs = if deltas.len() % 2 == 0 {
        (deltas[mid - 1] as f64 + deltas[mid] as f64) / 2.0
    } else {
        deltas[mid] as f64
    };

    Frequency::from_days((median_secs / SECONDS_PER_DAY).floor())
}
