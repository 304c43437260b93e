//! HTTP forecast client.
//!
//! `POST {base_url}/forecast` with
//! `{"model", "history": {"timestamps", "values"}, "target_timestamps"}`,
//! answered by `{"forecast": [f64]}`. Authenticated with a bearer key read
//! from the environment when the factory is built.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{ErrorKind, HistoryPoints, Predictor, PredictorError, PredictorFactory, TargetScaffold};
use crate::config::{ConfigurationError, PredictorSettings};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Serialize)]
struct ForecastRequest<'a> {
    model: &'a str,
    history: HistoryPayload,
    target_timestamps: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HistoryPayload {
    timestamps: Vec<String>,
    values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    forecast: Vec<f64>,
}

fn format_all(timestamps: &[NaiveDateTime]) -> Vec<String> {
    timestamps
        .iter()
        .map(|t| t.format(TIMESTAMP_FORMAT).to_string())
        .collect()
}

fn classify(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() || err.is_connect() {
        ErrorKind::Transient
    } else if let Some(status) = err.status() {
        ErrorKind::from_status(status.as_u16())
    } else {
        ErrorKind::classify_message(&err.to_string())
    }
}

// ─── Factory ─────────────────────────────────────────────────────────

/// Opens HTTP sessions sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpPredictorFactory {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpPredictorFactory {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigurationError::Predictor(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/forecast", base_url.trim_end_matches('/')),
            api_key: api_key.into(),
        })
    }

    /// Resolve the API key from `settings.api_key_env`.
    pub fn from_settings(settings: &PredictorSettings) -> Result<Self, ConfigurationError> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigurationError::MissingCredential {
                var: settings.api_key_env.clone(),
            })?;
        Self::new(
            &settings.base_url,
            api_key,
            Duration::from_secs(settings.timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PredictorFactory for HttpPredictorFactory {
    fn open(&self) -> Result<Arc<dyn Predictor>, ConfigurationError> {
        Ok(Arc::new(HttpPredictor {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

// ─── Session ─────────────────────────────────────────────────────────

pub struct HttpPredictor {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    closed: AtomicBool,
}

#[async_trait]
impl Predictor for HttpPredictor {
    fn name(&self) -> &str {
        "http"
    }

    async fn forecast(
        &self,
        history: HistoryPoints<'_>,
        target: TargetScaffold<'_>,
    ) -> Result<Vec<f64>, PredictorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PredictorError::permanent("session already closed"));
        }

        let body = ForecastRequest {
            model: target.model,
            history: HistoryPayload {
                timestamps: format_all(history.timestamps),
                values: history.values.to_vec(),
            },
            target_timestamps: format_all(target.timestamps),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PredictorError::new(classify(&e), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PredictorError::new(
                ErrorKind::from_status(status.as_u16()),
                format!("HTTP {}: {}", status.as_u16(), text.trim()),
            ));
        }

        let parsed: ForecastResponse = response
            .json()
            .await
            .map_err(|e| PredictorError::new(classify(&e), format!("invalid forecast response: {e}")))?;
        Ok(parsed.forecast)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response, returning the raw request.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let content_length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if buf.len() >= split + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    fn ts(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn posts_history_and_parses_forecast() {
        let (base, server) = serve_once("200 OK", r#"{"forecast":[1.5,2.5]}"#).await;
        let factory = HttpPredictorFactory::new(&base, "secret", Duration::from_secs(5)).unwrap();
        let predictor = factory.open().unwrap();

        let history_ts = [ts(1), ts(2)];
        let target_ts = [ts(3), ts(4)];
        let values = predictor
            .forecast(
                HistoryPoints { timestamps: &history_ts, values: &[1.0, 2.0] },
                TargetScaffold { timestamps: &target_ts, model: "sfm-moe-v1" },
            )
            .await
            .unwrap();
        assert_eq!(values, vec![1.5, 2.5]);

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /forecast"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains("\"model\":\"sfm-moe-v1\""));
        assert!(request.contains("2024-02-03T00:00:00"));
    }

    #[tokio::test]
    async fn gateway_errors_are_transient() {
        let (base, _server) = serve_once("503 Service Unavailable", r#"{"detail":"busy"}"#).await;
        let factory = HttpPredictorFactory::new(&base, "secret", Duration::from_secs(5)).unwrap();
        let predictor = factory.open().unwrap();

        let err = predictor
            .forecast(
                HistoryPoints { timestamps: &[ts(1)], values: &[1.0] },
                TargetScaffold { timestamps: &[ts(2)], model: "m" },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
        assert!(err.message.contains("503"));
    }

    #[tokio::test]
    async fn unauthorized_is_configuration() {
        let (base, _server) = serve_once("401 Unauthorized", "{}").await;
        let factory = HttpPredictorFactory::new(&base, "wrong", Duration::from_secs(5)).unwrap();
        let predictor = factory.open().unwrap();

        let err = predictor
            .forecast(
                HistoryPoints { timestamps: &[ts(1)], values: &[1.0] },
                TargetScaffold { timestamps: &[ts(2)], model: "m" },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn closed_session_refuses_calls() {
        let factory =
            HttpPredictorFactory::new("http://127.0.0.1:9", "k", Duration::from_secs(1)).unwrap();
        let predictor = factory.open().unwrap();
        predictor.close().await;
        let err = predictor
            .forecast(
                HistoryPoints { timestamps: &[ts(1)], values: &[1.0] },
                TargetScaffold { timestamps: &[ts(2)], model: "m" },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
    }

    #[test]
    fn missing_key_is_configuration_error() {
        let settings = PredictorSettings {
            api_key_env: "BACKCAST_HTTP_TEST_KEY_UNSET".into(),
            ..PredictorSettings::default()
        };
        let err = HttpPredictorFactory::from_settings(&settings).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingCredential { ref var } if var == "BACKCAST_HTTP_TEST_KEY_UNSET"));
    }

    #[test]
    fn endpoint_joins_base_url() {
        let f = HttpPredictorFactory::new("https://api.example.com/v2/", "k", Duration::from_secs(1)).unwrap();
        assert_eq!(f.endpoint(), "https://api.example.com/v2/forecast");
    }
}
