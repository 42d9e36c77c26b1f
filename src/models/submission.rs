use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};

/// Longest client-supplied content id accepted at ingestion.
pub const MAX_CONTENT_ID_LEN: usize = 128;

/// Limits applied to incoming submissions.
#[derive(Debug, Clone)]
pub struct SubmissionLimits {
    pub max_payload_bytes: usize,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: 64 * 1024,
        }
    }
}

/// Body of `POST /api/v1/content`.
#[derive(Debug, Clone, Deserialize, Validate)]
#[garde(context(SubmissionLimits))]
pub struct SubmitRequest {
    /// Optional caller-chosen id; generated when absent.
    #[serde(default, alias = "id")]
    #[garde(custom(validate_content_id))]
    pub content_id: Option<String>,

    #[serde(alias = "text")]
    #[garde(custom(validate_payload))]
    pub payload: String,
}

/// Response returned once a submission has been handed to the broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitResponse {
    pub content_id: String,
    pub status: String,
}

impl SubmitResponse {
    pub fn accepted(content_id: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            status: "accepted".to_string(),
        }
    }
}

/// The event published for every accepted submission. Delivered to queues verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentSubmission {
    pub content_id: String,
    pub payload: String,
    pub submitted_at: DateTime<Utc>,
}

fn validate_payload(value: &str, limits: &SubmissionLimits) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("payload must not be empty"));
    }
    if value.len() > limits.max_payload_bytes {
        return Err(garde::Error::new(format!(
            "payload exceeds {} bytes",
            limits.max_payload_bytes
        )));
    }
    Ok(())
}

fn validate_content_id(value: &Option<String>, _limits: &SubmissionLimits) -> garde::Result {
    match value {
        Some(id) if !is_well_formed_content_id(id) => Err(garde::Error::new(format!(
            "content_id must be 1-{} characters of [A-Za-z0-9_.:-]",
            MAX_CONTENT_ID_LEN
        ))),
        _ => Ok(()),
    }
}

pub fn is_well_formed_content_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CONTENT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}
