use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::submission::ContentSubmission;

/// A leased unit of work handed out by the dispatch queue.
///
/// `delivery_count` counts this delivery too, so the first lease observes 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: Uuid,
    pub submission: ContentSubmission,
    pub delivery_count: u32,
    /// The lease expires at this instant; the job is redelivered afterwards.
    pub visible_after: DateTime<Utc>,
}

impl Job {
    pub fn content_id(&self) -> &str {
        &self.submission.content_id
    }
}

/// A job that exhausted its delivery budget and left the normal pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetter {
    pub job_id: Uuid,
    /// `None` when the queued body could not be decoded.
    pub submission: Option<ContentSubmission>,
    pub delivery_count: u32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Delivery policy for a dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePolicy {
    /// Redeliveries after the first delivery. A job whose count goes past
    /// this is dead-lettered on its next dequeue.
    pub max_delivery_count: u32,
}

impl Default for QueuePolicy {
    fn default() -> Self {
        Self {
            max_delivery_count: 5,
        }
    }
}
