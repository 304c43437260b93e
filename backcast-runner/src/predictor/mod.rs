//! Predictor capability — the external forecaster invoked once per window.
//!
//! A [`PredictorFactory`] opens one session per backtest invocation. The
//! session is shared by every window of that invocation and closed on every
//! exit path by the coordinator.
//!
//! Failures are classified by the predictor itself into [`ErrorKind`]:
//! - `Transient` → retried by the dispatcher
//! - `Permanent` → window yields no result
//! - `Configuration` → aborts the whole pipeline

pub mod http;
pub mod naive;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use thiserror::Error;

use crate::config::{ConfigurationError, PredictorKind, PredictorSettings};

pub use http::HttpPredictorFactory;
pub use naive::{LastValuePredictor, LastValuePredictorFactory};

/// Error-text markers of failures worth retrying.
pub const TRANSIENT_MARKERS: [&str; 5] = ["502", "503", "504", "timeout", "Bad Gateway"];

// ─── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Configuration,
}

impl ErrorKind {
    /// Classify a failure from its text alone.
    pub fn classify_message(message: &str) -> Self {
        if TRANSIENT_MARKERS.iter().any(|m| message.contains(m)) {
            ErrorKind::Transient
        } else {
            ErrorKind::Permanent
        }
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 429 | 502 | 503 | 504 => ErrorKind::Transient,
            401 | 403 => ErrorKind::Configuration,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single failed forecast call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} predictor error: {message}")]
pub struct PredictorError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PredictorError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Kind inferred from the message text.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorKind::classify_message(&message), message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

// ─── Call payloads ───────────────────────────────────────────────────

/// History handed to the predictor: parallel timestamp/value slices.
#[derive(Debug, Clone, Copy)]
pub struct HistoryPoints<'a> {
    pub timestamps: &'a [NaiveDateTime],
    pub values: &'a [f64],
}

impl HistoryPoints<'_> {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last_value(&self) -> Option<f64> {
        self.values.last().copied()
    }
}

/// Timestamps to forecast, plus the model to forecast them with.
#[derive(Debug, Clone, Copy)]
pub struct TargetScaffold<'a> {
    pub timestamps: &'a [NaiveDateTime],
    pub model: &'a str,
}

// ─── Traits ──────────────────────────────────────────────────────────

/// An open predictor session. Safe for concurrent use by many windows.
#[async_trait]
pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    /// Forecast one value per target timestamp.
    async fn forecast(
        &self,
        history: HistoryPoints<'_>,
        target: TargetScaffold<'_>,
    ) -> Result<Vec<f64>, PredictorError>;

    /// Release the session. Called exactly once per session.
    async fn close(&self) {}
}

/// Opens a predictor session per backtest invocation.
pub trait PredictorFactory: Send + Sync {
    fn open(&self) -> Result<Arc<dyn Predictor>, ConfigurationError>;
}

impl<F> PredictorFactory for F
where
    F: Fn() -> Result<Arc<dyn Predictor>, ConfigurationError> + Send + Sync,
{
    fn open(&self) -> Result<Arc<dyn Predictor>, ConfigurationError> {
        self()
    }
}

/// Build the factory selected by `[predictor] kind`.
///
/// Credentials are resolved here, so a missing API key surfaces before any
/// job starts.
pub fn build_predictor_factory(
    settings: &PredictorSettings,
) -> Result<Arc<dyn PredictorFactory>, ConfigurationError> {
    match settings.kind {
        PredictorKind::Http => Ok(Arc::new(HttpPredictorFactory::from_settings(settings)?)),
        PredictorKind::Naive => Ok(Arc::new(LastValuePredictorFactory)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_markers() {
        assert_eq!(ErrorKind::classify_message("HTTP 502"), ErrorKind::Transient);
        assert_eq!(ErrorKind::classify_message("upstream 503 Service Unavailable"), ErrorKind::Transient);
        assert_eq!(ErrorKind::classify_message("request timeout"), ErrorKind::Transient);
        assert_eq!(ErrorKind::classify_message("Bad Gateway"), ErrorKind::Transient);
        assert_eq!(ErrorKind::classify_message("invalid series"), ErrorKind::Permanent);
        assert_eq!(ErrorKind::classify_message("HTTP 500"), ErrorKind::Permanent);
    }

    #[test]
    fn status_codes() {
        assert_eq!(ErrorKind::from_status(504), ErrorKind::Transient);
        assert_eq!(ErrorKind::from_status(429), ErrorKind::Transient);
        assert_eq!(ErrorKind::from_status(401), ErrorKind::Configuration);
        assert_eq!(ErrorKind::from_status(400), ErrorKind::Permanent);
        assert_eq!(ErrorKind::from_status(500), ErrorKind::Permanent);
    }

    #[test]
    fn from_message_keeps_text() {
        let err = PredictorError::from_message("gateway timeout");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "transient predictor error: gateway timeout");
    }

    #[test]
    fn naive_settings_build_without_credentials() {
        let settings = PredictorSettings {
            kind: PredictorKind::Naive,
            api_key_env: "BACKCAST_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..PredictorSettings::default()
        };
        let factory = build_predictor_factory(&settings).unwrap();
        assert_eq!(factory.open().unwrap().name(), "last_value");
    }
}
