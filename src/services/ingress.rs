use chrono::Utc;
use garde::Validate;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::submission::{ContentSubmission, SubmissionLimits, SubmitRequest, SubmitResponse};
use crate::services::broadcaster::{BroadcastError, Broadcaster};

/// Synchronous acceptance half of the pipeline.
///
/// A submission is validated, given a content id and published exactly once.
/// The caller gets an acknowledgment, never a verdict.
pub struct IngressService {
    broadcaster: Arc<dyn Broadcaster>,
    limits: SubmissionLimits,
}

impl IngressService {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, limits: SubmissionLimits) -> Self {
        Self { broadcaster, limits }
    }

    pub fn limits(&self) -> &SubmissionLimits {
        &self.limits
    }

    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, IngressError> {
        if let Err(report) = request.validate_with(&self.limits) {
            metrics::counter!("moderation_submissions_rejected").increment(1);
            return Err(IngressError::Validation(report.to_string()));
        }

        let content_id = request
            .content_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let submission = ContentSubmission {
            content_id,
            payload: request.payload,
            submitted_at: Utc::now(),
        };

        if let Err(e) = self.broadcaster.publish(&submission).await {
            tracing::error!(content_id = %submission.content_id, error = %e, "Failed to publish submission");
            return Err(IngressError::Dispatch(e));
        }

        metrics::counter!("moderation_submissions_total").increment(1);
        tracing::info!(
            content_id = %submission.content_id,
            payload_bytes = submission.payload.len(),
            "Submission accepted"
        );

        Ok(SubmitResponse::accepted(submission.content_id))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("Invalid submission: {0}")]
    Validation(String),

    #[error("Submission could not be dispatched: {0}")]
    Dispatch(#[from] BroadcastError),
}
