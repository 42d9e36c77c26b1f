use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::models::job::Job;
use crate::models::verdict::{Verdict, VerdictRecord};
use crate::services::classifier::{ClassifierError, ModerationClassifier};
use crate::services::queue::{DispatchQueue, QueueError};
use crate::services::store::{ResultStore, StoreError};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub worker_count: usize,
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub classifier_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_count: 4,
            batch_size: 10,
            visibility_timeout: Duration::from_secs(300),
            classifier_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Verdict stored and job acknowledged.
    Completed,
    /// Unprocessable payload recorded as `failed` and job acknowledged.
    RecordedFailure,
    /// Left unacknowledged; the queue redelivers it once the lease lapses.
    Abandoned,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl From<ClassifierError> for ProcessingError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::Permanent(_) => ProcessingError::Permanent(err.to_string()),
            ClassifierError::Transient(_) | ClassifierError::Timeout(_) | ClassifierError::Config(_) => {
                ProcessingError::Transient(err.to_string())
            }
        }
    }
}

impl From<StoreError> for ProcessingError {
    fn from(err: StoreError) -> Self {
        ProcessingError::Transient(err.to_string())
    }
}

impl From<QueueError> for ProcessingError {
    fn from(err: QueueError) -> Self {
        ProcessingError::Transient(err.to_string())
    }
}

/// Pool of independent queue consumers.
///
/// Workers share no in-memory state; the queue lease and the idempotent
/// store upsert are the only coordination points.
pub struct WorkerPool {
    queue: Arc<dyn DispatchQueue>,
    classifier: Arc<dyn ModerationClassifier>,
    store: Arc<dyn ResultStore>,
    settings: WorkerSettings,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn DispatchQueue>,
        classifier: Arc<dyn ModerationClassifier>,
        store: Arc<dyn ResultStore>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            queue,
            classifier,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Start `worker_count` consumer tasks. They exit once `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.settings.worker_count)
            .map(|worker_id| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run_worker(worker_id, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker_id, "Worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_once(worker_id).await {
                Ok(0) => {
                    if let Ok(depth) = self.queue.depth().await {
                        metrics::gauge!("moderation_queue_depth").set(depth as f64);
                    }
                    true
                }
                Ok(handled) => {
                    tracing::debug!(worker_id, handled, "Batch processed");
                    false
                }
                Err(e) => {
                    tracing::error!(worker_id, error = %e, "Dequeue failed, will retry");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.settings.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(worker_id, "Worker stopped");
    }

    /// Lease one batch and process each job in order. Returns the batch size.
    ///
    /// Every job of the batch not yet finished has its lease renewed every
    /// half visibility timeout, so jobs waiting their turn stay hidden.
    pub async fn run_once(&self, worker_id: usize) -> Result<usize, QueueError> {
        let jobs = self
            .queue
            .dequeue(self.settings.batch_size, self.settings.visibility_timeout)
            .await?;
        if jobs.is_empty() {
            return Ok(0);
        }

        let finished = AtomicUsize::new(0);
        let work = async {
            for job in &jobs {
                self.process_job(worker_id, job).await;
                finished.fetch_add(1, Ordering::SeqCst);
            }
        };
        tokio::pin!(work);

        let renew_every = self.settings.visibility_timeout / 2;
        if renew_every.is_zero() {
            work.await;
            return Ok(jobs.len());
        }

        let mut renew = tokio::time::interval_at(tokio::time::Instant::now() + renew_every, renew_every);
        loop {
            tokio::select! {
                _ = &mut work => break,
                _ = renew.tick() => {
                    let done = finished.load(Ordering::SeqCst);
                    self.renew_leases(&jobs[done..]).await;
                }
            }
        }

        Ok(jobs.len())
    }

    async fn renew_leases(&self, jobs: &[Job]) {
        for job in jobs {
            match self.queue.extend_lease(job.job_id, self.settings.visibility_timeout).await {
                Ok(visible_after) => tracing::debug!(job_id = %job.job_id, %visible_after, "Lease extended"),
                Err(e) => tracing::warn!(job_id = %job.job_id, error = %e, "Lease extension failed"),
            }
        }
    }

    /// Classify, persist, then acknowledge. Acknowledgment only follows a
    /// confirmed store write.
    pub async fn process_job(&self, worker_id: usize, job: &Job) -> JobOutcome {
        let started = Instant::now();
        tracing::info!(
            worker_id,
            job_id = %job.job_id,
            content_id = %job.content_id(),
            delivery_count = job.delivery_count,
            "Processing moderation job"
        );

        let record = match self.classify(job).await {
            Ok(verdict) => VerdictRecord::complete(job.content_id(), verdict, Utc::now()),
            Err(ProcessingError::Permanent(reason)) => {
                tracing::warn!(
                    worker_id,
                    content_id = %job.content_id(),
                    reason = %reason,
                    "Payload cannot be classified, recording failure"
                );
                VerdictRecord::failed(job.content_id(), reason, Utc::now())
            }
            Err(ProcessingError::Transient(reason)) => return self.abandon(worker_id, job, &reason),
        };

        match self.store.upsert(&record).await {
            Ok(outcome) => {
                tracing::debug!(content_id = %job.content_id(), ?outcome, "Verdict persisted");
            }
            Err(e) => return self.abandon(worker_id, job, &ProcessingError::from(e).to_string()),
        }

        match self.queue.acknowledge(job.job_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(job_id = %job.job_id, "Job already acknowledged by another delivery");
            }
            Err(e) => return self.abandon(worker_id, job, &ProcessingError::from(e).to_string()),
        }

        metrics::histogram!("moderation_processing_seconds").record(started.elapsed().as_secs_f64());

        let outcome = if record.verdict.is_some() {
            metrics::counter!("moderation_jobs_completed").increment(1);
            JobOutcome::Completed
        } else {
            metrics::counter!("moderation_jobs_failed").increment(1);
            JobOutcome::RecordedFailure
        };

        tracing::info!(
            worker_id,
            job_id = %job.job_id,
            content_id = %job.content_id(),
            status = %record.status,
            outcome = ?record.verdict.as_ref().map(|v| v.outcome),
            duration_ms = started.elapsed().as_millis() as u64,
            "Job finished"
        );

        outcome
    }

    fn abandon(&self, worker_id: usize, job: &Job, reason: &str) -> JobOutcome {
        metrics::counter!("moderation_jobs_retried").increment(1);
        tracing::warn!(
            worker_id,
            job_id = %job.job_id,
            content_id = %job.content_id(),
            delivery_count = job.delivery_count,
            reason = %reason,
            "Leaving job for redelivery"
        );
        JobOutcome::Abandoned
    }

    /// Run the classifier under the configured timeout.
    async fn classify(&self, job: &Job) -> Result<Verdict, ProcessingError> {
        let timeout = self.settings.classifier_timeout;
        let result = tokio::time::timeout(
            timeout,
            self.classifier.classify(&job.submission.payload, timeout),
        )
        .await;
        flatten_timeout(result, timeout)
    }
}

fn flatten_timeout(
    result: Result<Result<Verdict, ClassifierError>, tokio::time::error::Elapsed>,
    timeout: Duration,
) -> Result<Verdict, ProcessingError> {
    match result {
        Ok(classified) => Ok(classified?),
        Err(_) => Err(ClassifierError::Timeout(timeout).into()),
    }
}
