use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::models::submission::ContentSubmission;
use crate::services::queue::{DispatchQueue, QueueError};

/// Fan-out point between ingestion and consumption.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Deliver a copy of `event` to every subscribed queue.
    ///
    /// `Ok` means every subscriber holds the event durably. A subscriber may
    /// end up with duplicates when an enqueue is retried.
    async fn publish(&self, event: &ContentSubmission) -> Result<(), BroadcastError>;
}

/// Topic with a fixed set of queue subscriptions and raw-payload delivery.
pub struct TopicBroadcaster {
    subscribers: Vec<Arc<dyn DispatchQueue>>,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl TopicBroadcaster {
    pub fn new(subscribers: Vec<Arc<dyn DispatchQueue>>, max_attempts: u32) -> Self {
        Self {
            subscribers,
            max_attempts: max_attempts.max(1),
            retry_backoff: Duration::from_millis(50),
        }
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    async fn deliver(&self, subscriber: usize, queue: &dyn DispatchQueue, event: &ContentSubmission) -> Result<(), BroadcastError> {
        let mut attempt = 1;
        loop {
            match queue.enqueue(event).await {
                Ok(job_id) => {
                    tracing::debug!(
                        content_id = %event.content_id,
                        job_id = %job_id,
                        subscriber,
                        "Event delivered to subscriber queue"
                    );
                    return Ok(());
                }
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(
                        content_id = %event.content_id,
                        subscriber,
                        attempt,
                        error = %e,
                        "Enqueue failed, retrying"
                    );
                    sleep(self.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(BroadcastError::Delivery {
                        subscriber,
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl Broadcaster for TopicBroadcaster {
    async fn publish(&self, event: &ContentSubmission) -> Result<(), BroadcastError> {
        if self.subscribers.is_empty() {
            return Err(BroadcastError::NoSubscribers);
        }

        for (index, queue) in self.subscribers.iter().enumerate() {
            self.deliver(index, queue.as_ref(), event).await?;
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Topic has no subscribers")]
    NoSubscribers,

    #[error("Delivery to subscriber {subscriber} failed after {attempts} attempts: {source}")]
    Delivery {
        subscriber: usize,
        attempts: u32,
        #[source]
        source: QueueError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{DeadLetter, Job, QueuePolicy};
    use crate::services::queue::InMemoryDispatchQueue;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    /// Queue that rejects the first `failures` enqueues.
    struct FlakyQueue {
        failures: u32,
        calls: AtomicU32,
        inner: InMemoryDispatchQueue,
    }

    impl FlakyQueue {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                inner: InMemoryDispatchQueue::new(QueuePolicy::default()),
            }
        }
    }

    #[async_trait]
    impl DispatchQueue for FlakyQueue {
        async fn enqueue(&self, submission: &ContentSubmission) -> Result<Uuid, QueueError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(QueueError::Unavailable("connection refused".to_string()));
            }
            self.inner.enqueue(submission).await
        }
        async fn dequeue(&self, max_batch: usize, visibility_timeout: Duration) -> Result<Vec<Job>, QueueError> {
            self.inner.dequeue(max_batch, visibility_timeout).await
        }
        async fn acknowledge(&self, job_id: Uuid) -> Result<bool, QueueError> {
            self.inner.acknowledge(job_id).await
        }
        async fn extend_lease(&self, job_id: Uuid, duration: Duration) -> Result<DateTime<Utc>, QueueError> {
            self.inner.extend_lease(job_id, duration).await
        }
        async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
            self.inner.dead_letters(limit).await
        }
        async fn depth(&self) -> Result<u64, QueueError> {
            self.inner.depth().await
        }
        async fn health_check(&self) -> Result<(), QueueError> {
            Ok(())
        }
    }

    fn event() -> ContentSubmission {
        ContentSubmission {
            content_id: "c1".to_string(),
            payload: "hello".to_string(),
            submitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_verbatim() {
        let first = Arc::new(InMemoryDispatchQueue::new(QueuePolicy::default()));
        let second = Arc::new(InMemoryDispatchQueue::new(QueuePolicy::default()));
        let topic = TopicBroadcaster::new(vec![first.clone(), second.clone()], 3);

        let event = event();
        topic.publish(&event).await.unwrap();

        for queue in [first, second] {
            let jobs = queue.dequeue(10, Duration::from_secs(30)).await.unwrap();
            assert_eq!(jobs.len(), 1);
            assert_eq!(jobs[0].submission, event);
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let topic = TopicBroadcaster::new(Vec::new(), 3);
        assert!(matches!(
            topic.publish(&event()).await,
            Err(BroadcastError::NoSubscribers)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_enqueue_failure_is_retried() {
        let queue = Arc::new(FlakyQueue::new(2));
        let topic = TopicBroadcaster::new(vec![queue.clone()], 3);

        topic.publish(&event()).await.unwrap();

        assert_eq!(queue.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_surface_delivery_error() {
        let queue = Arc::new(FlakyQueue::new(10));
        let topic = TopicBroadcaster::new(vec![queue.clone()], 3);

        let err = topic.publish(&event()).await.unwrap_err();
        assert!(matches!(err, BroadcastError::Delivery { attempts: 3, .. }));
        assert_eq!(queue.depth().await.unwrap(), 0);
    }
}
