use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::verdict::{LabelScore, Verdict};

/// External moderation capability.
#[async_trait]
pub trait ModerationClassifier: Send + Sync {
    /// Classify `payload`, giving up after `timeout`.
    async fn classify(&self, payload: &str, timeout: Duration) -> Result<Verdict, ClassifierError>;
}

/// HTTP client for a toxicity-scoring classifier service.
pub struct HttpClassifier {
    http: Client,
    endpoint: String,
    api_token: Option<String>,
    toxicity_threshold: f64,
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct ClassifyResponse {
    toxicity: f64,
    #[serde(default)]
    labels: Vec<LabelScore>,
}

impl HttpClassifier {
    pub fn new(endpoint: &str, api_token: Option<String>, toxicity_threshold: f64) -> Result<Self, ClassifierError> {
        let http = Client::builder()
            .build()
            .map_err(|e| ClassifierError::Config(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_token,
            toxicity_threshold,
        })
    }
}

#[async_trait]
impl ModerationClassifier for HttpClassifier {
    async fn classify(&self, payload: &str, timeout: Duration) -> Result<Verdict, ClassifierError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&ClassifyRequest { text: payload });

        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| from_transport(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let scores: ClassifyResponse = response
            .json()
            .await
            .map_err(|e| from_transport(e, timeout))?;

        Ok(Verdict::from_scores(
            scores.toxicity,
            scores.labels,
            self.toxicity_threshold,
        ))
    }
}

fn from_transport(err: reqwest::Error, timeout: Duration) -> ClassifierError {
    if err.is_timeout() {
        ClassifierError::Timeout(timeout)
    } else {
        ClassifierError::Transient(err.to_string())
    }
}

/// Map a non-success HTTP status onto the retry taxonomy.
///
/// Only rejections of the payload itself are permanent. Auth and routing
/// failures point at deployment config and must not turn into `failed` verdicts.
fn classify_status(status: StatusCode, body: String) -> ClassifierError {
    let detail = format!("classifier returned {}: {}", status, body);
    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNSUPPORTED_MEDIA_TYPE
        | StatusCode::UNPROCESSABLE_ENTITY => ClassifierError::Permanent(detail),
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND
        | StatusCode::METHOD_NOT_ALLOWED => ClassifierError::Config(detail),
        _ => ClassifierError::Transient(detail),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Transient classifier failure: {0}")]
    Transient(String),

    #[error("Classifier rejected the payload: {0}")]
    Permanent(String),

    #[error("Classifier did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Classifier configuration error: {0}")]
    Config(String),
}
