use serde::Deserialize;
use std::time::Duration;

use crate::models::job::QueuePolicy;
use crate::models::submission::SubmissionLimits;
use crate::models::verdict::OverwritePolicy;
use crate::services::worker::WorkerSettings;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string for the verdict store
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Redis connection string for the dispatch queue
    pub redis_url: String,

    /// Moderation classifier endpoint
    pub classifier_url: String,

    /// Bearer token sent to the classifier, if it requires one
    #[serde(default)]
    pub classifier_api_token: Option<String>,

    /// Key prefix for the queue's Redis keys
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,

    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,

    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Jobs leased per dequeue call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Redeliveries allowed after the first delivery before a job is dead-lettered
    #[serde(default = "default_max_delivery_count")]
    pub max_delivery_count: u32,

    #[serde(default = "default_classifier_timeout_secs")]
    pub classifier_timeout_secs: u64,

    /// Idle sleep between empty dequeues
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default)]
    pub overwrite_policy: OverwritePolicy,

    /// Toxicity score at or above which content is flagged
    #[serde(default = "default_toxicity_threshold")]
    pub toxicity_threshold: f64,

    /// Enqueue attempts per subscriber before a publish fails
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_db_max_connections() -> u32 {
    20
}

fn default_queue_prefix() -> String {
    "moderation".to_string()
}

fn default_max_payload_bytes() -> usize {
    64 * 1024
}

fn default_worker_count() -> usize {
    4
}

fn default_batch_size() -> usize {
    10
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_max_delivery_count() -> u32 {
    5
}

fn default_classifier_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_toxicity_threshold() -> f64 {
    0.3
}

fn default_publish_attempts() -> u32 {
    3
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            max_delivery_count: self.max_delivery_count.max(1),
        }
    }

    pub fn submission_limits(&self) -> SubmissionLimits {
        SubmissionLimits {
            max_payload_bytes: self.max_payload_bytes,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            worker_count: self.worker_count.max(1),
            batch_size: self.batch_size.max(1),
            visibility_timeout: Duration::from_secs(self.visibility_timeout_secs),
            classifier_timeout: Duration::from_secs(self.classifier_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// Log settings that are legal but likely to cause spurious redelivery.
    pub fn warn_on_suspicious_settings(&self) {
        if self.classifier_outlasts_lease() {
            tracing::warn!(
                classifier_timeout_secs = self.classifier_timeout_secs,
                visibility_timeout_secs = self.visibility_timeout_secs,
                "Classifier timeout is not below the visibility timeout; jobs may be redelivered while still in flight"
            );
        }

        if self.batch_outlasts_lease() {
            tracing::warn!(
                batch_size = self.batch_size,
                classifier_timeout_secs = self.classifier_timeout_secs,
                visibility_timeout_secs = self.visibility_timeout_secs,
                "A slow batch can outlast one lease; queued jobs depend on lease renewal to stay hidden"
            );
        }
    }

    fn classifier_outlasts_lease(&self) -> bool {
        self.classifier_timeout_secs >= self.visibility_timeout_secs
    }

    fn batch_outlasts_lease(&self) -> bool {
        self.classifier_timeout_secs
            .saturating_mul(self.batch_size.max(1) as u64)
            >= self.visibility_timeout_secs
    }
}
