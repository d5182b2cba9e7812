//! Client for the external scoring service.
//!
//! `POST {endpoint}/predict` with `{"data": [..fields..]}`, answered by
//! `{"prediction": <number>, "confidence": <number>?}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, TxError};
use crate::models::Prediction;

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000";

#[derive(Debug, Serialize)]
pub struct PredictRequest<'a> {
    pub data: &'a [String],
}

#[derive(Debug, Deserialize)]
pub struct PredictResponse {
    pub prediction: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Why a single row could not be scored.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionError {
    /// Connection, DNS, timeout or body-read failure.
    #[error("ML Model API Error: {0}")]
    Transport(String),

    #[error("ML Model API Error: status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed prediction response: {0}")]
    Malformed(String),
}

/// Tagged outcome of one scoring call.
pub type ScoreResult = std::result::Result<Prediction, PredictionError>;

#[async_trait]
pub trait ScoringClient: Send + Sync {
    async fn score(&self, fields: &[String]) -> ScoreResult;

    /// Base URL, for logging.
    fn endpoint(&self) -> &str;
}

pub struct HttpScoringClient {
    client: reqwest::Client,
    endpoint: String,
    url: String,
}

impl HttpScoringClient {
    /// `timeout` of `None` leaves requests unbounded.
    pub fn new(endpoint: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| TxError::Other(format!("Failed to create HTTP client: {e}")))?;
        let endpoint = endpoint.trim_end_matches('/').to_string();
        Ok(Self {
            client,
            url: format!("{endpoint}/predict"),
            endpoint,
        })
    }
}

/// Decode a response body, rejecting non-finite scores.
pub fn decode_response(body: &str) -> ScoreResult {
    let parsed: PredictResponse =
        serde_json::from_str(body).map_err(|e| PredictionError::Malformed(e.to_string()))?;
    if !parsed.prediction.is_finite() {
        return Err(PredictionError::Malformed(format!(
            "non-finite prediction {}",
            parsed.prediction
        )));
    }
    Ok(Prediction {
        score: parsed.prediction,
        confidence: parsed.confidence,
    })
}

#[async_trait]
impl ScoringClient for HttpScoringClient {
    async fn score(&self, fields: &[String]) -> ScoreResult {
        let response = self
            .client
            .post(&self.url)
            .json(&PredictRequest { data: fields })
            .send()
            .await
            .map_err(|e| PredictionError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PredictionError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(PredictionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        decode_response(&body)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
