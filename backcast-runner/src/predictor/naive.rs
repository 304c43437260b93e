//! Offline persistence baseline: every target gets the last history value.

use std::sync::Arc;

use async_trait::async_trait;

use super::{HistoryPoints, Predictor, PredictorError, PredictorFactory, TargetScaffold};
use crate::config::ConfigurationError;

#[derive(Debug, Clone, Copy, Default)]
pub struct LastValuePredictor;

#[async_trait]
impl Predictor for LastValuePredictor {
    fn name(&self) -> &str {
        "last_value"
    }

    async fn forecast(
        &self,
        history: HistoryPoints<'_>,
        target: TargetScaffold<'_>,
    ) -> Result<Vec<f64>, PredictorError> {
        let last = history
            .last_value()
            .ok_or_else(|| PredictorError::permanent("empty history"))?;
        Ok(vec![last; target.timestamps.len()])
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LastValuePredictorFactory;

impl PredictorFactory for LastValuePredictorFactory {
    fn open(&self) -> Result<Arc<dyn Predictor>, ConfigurationError> {
        Ok(Arc::new(LastValuePredictor))
    }
}
