use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::{DeadLetter, Job, QueuePolicy};
use crate::models::submission::ContentSubmission;

const DELIVERY_LIMIT_REASON: &str = "max delivery count reached";

/// Durable job buffer with leases, redelivery and a dead-letter path.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Store a submission as a new job. Returns the assigned job id.
    async fn enqueue(&self, submission: &ContentSubmission) -> Result<Uuid, QueueError>;

    /// Lease up to `max_batch` visible jobs until `now + visibility_timeout`.
    ///
    /// A job may be delivered once plus `max_delivery_count` redeliveries.
    /// Past that it is moved to the dead-letter path instead of being returned.
    async fn dequeue(&self, max_batch: usize, visibility_timeout: Duration) -> Result<Vec<Job>, QueueError>;

    /// Permanently remove a job. Returns `false` if it was already gone.
    async fn acknowledge(&self, job_id: Uuid) -> Result<bool, QueueError>;

    /// Push a leased job's visibility deadline to `now + duration`.
    async fn extend_lease(&self, job_id: Uuid, duration: Duration) -> Result<DateTime<Utc>, QueueError>;

    /// Most recent dead-lettered jobs, newest first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError>;

    /// Jobs waiting or leased.
    async fn depth(&self) -> Result<u64, QueueError>;

    /// Check transport connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError>;
}

fn lease_deadline(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>, QueueError> {
    let delta = chrono::Duration::from_std(duration).map_err(|_| QueueError::InvalidDuration(duration))?;
    now.checked_add_signed(delta)
        .ok_or(QueueError::InvalidDuration(duration))
}

// ── Redis transport ─────────────────────────────────────────────────────

/// Requeue expired leases, then lease up to ARGV[3] jobs.
///
/// KEYS: pending list, leased zset, dead-letter list.
/// ARGV: now ms, visible-after ms, max batch, max deliveries, job key prefix,
///       dead-lettered-at (RFC 3339), dead-letter reason.
const DEQUEUE_LUA: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(expired) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('RPUSH', KEYS[1], id)
end
local out = {}
local leased = 0
local max_batch = tonumber(ARGV[3])
local max_delivery = tonumber(ARGV[4])
while leased < max_batch do
  local id = redis.call('RPOP', KEYS[1])
  if not id then break end
  local key = ARGV[5] .. id
  local body = redis.call('HGET', key, 'body')
  if body then
    local count = tonumber(redis.call('HGET', key, 'delivery_count') or '0')
    if count > max_delivery then
      redis.call('LPUSH', KEYS[3], cjson.encode({
        job_id = id, body = body, delivery_count = count,
        dead_lettered_at = ARGV[6], reason = ARGV[7]
      }))
      redis.call('DEL', key)
      table.insert(out, {'dead', id, body, count})
    else
      count = redis.call('HINCRBY', key, 'delivery_count', 1)
      redis.call('ZADD', KEYS[2], ARGV[2], id)
      table.insert(out, {'lease', id, body, count})
      leased = leased + 1
    end
  end
end
return out
"#;

/// KEYS: leased zset, dead-letter list, job hash. ARGV: job id, entry JSON.
const DEAD_LETTER_LUA: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('LPUSH', KEYS[2], ARGV[2])
return redis.call('DEL', KEYS[3])
"#;

/// KEYS: leased zset. ARGV: job id, new visible-after ms.
const EXTEND_LEASE_LUA: &str = r#"
if redis.call('ZSCORE', KEYS[1], ARGV[1]) then
  redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
  return 1
end
return 0
"#;

/// Dead-letter entry as written to Redis. The body is kept verbatim so an
/// undecodable submission is still inspectable.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDeadLetter {
    job_id: Uuid,
    body: String,
    delivery_count: u32,
    dead_lettered_at: DateTime<Utc>,
    reason: String,
}

impl From<StoredDeadLetter> for DeadLetter {
    fn from(stored: StoredDeadLetter) -> Self {
        DeadLetter {
            job_id: stored.job_id,
            submission: serde_json::from_str(&stored.body).ok(),
            delivery_count: stored.delivery_count,
            reason: stored.reason,
            dead_lettered_at: stored.dead_lettered_at,
        }
    }
}

/// Inclusive LRANGE stop index for the first `limit` entries.
fn lrange_stop(limit: usize) -> isize {
    isize::try_from(limit).map_or(isize::MAX, |limit| limit - 1)
}

fn decode_dead_letter(entry: &str) -> Option<DeadLetter> {
    match serde_json::from_str::<StoredDeadLetter>(entry) {
        Ok(stored) => Some(stored.into()),
        Err(e) => {
            tracing::warn!(error = %e, entry, "Skipping unreadable dead-letter entry");
            None
        }
    }
}

struct QueueKeys {
    pending: String,
    leased: String,
    dead: String,
    job_prefix: String,
}

impl QueueKeys {
    /// All keys share one hash tag so the scripts stay single-slot on a cluster.
    fn new(prefix: &str) -> Self {
        let tag = format!("{{{}}}", prefix);
        Self {
            pending: format!("{}:pending", tag),
            leased: format!("{}:leased", tag),
            dead: format!("{}:dead", tag),
            job_prefix: format!("{}:job:", tag),
        }
    }

    fn job(&self, job_id: &Uuid) -> String {
        format!("{}{}", self.job_prefix, job_id)
    }
}

/// Redis-backed dispatch queue with visibility-timeout leases.
pub struct RedisDispatchQueue {
    client: redis::Client,
    keys: QueueKeys,
    policy: QueuePolicy,
    dequeue_script: redis::Script,
    dead_letter_script: redis::Script,
    extend_script: redis::Script,
}

impl RedisDispatchQueue {
    pub fn new(redis_url: &str, prefix: &str, policy: QueuePolicy) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            keys: QueueKeys::new(prefix),
            policy,
            dequeue_script: redis::Script::new(DEQUEUE_LUA),
            dead_letter_script: redis::Script::new(DEAD_LETTER_LUA),
            extend_script: redis::Script::new(EXTEND_LEASE_LUA),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Move a leased job with an unreadable body straight to the dead-letter list.
    async fn dead_letter_undecodable(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        job_id: Uuid,
        body: String,
        delivery_count: u32,
        reason: String,
    ) -> Result<(), QueueError> {
        let entry = serde_json::to_string(&StoredDeadLetter {
            job_id,
            body,
            delivery_count,
            dead_lettered_at: Utc::now(),
            reason,
        })?;
        let _: i64 = self
            .dead_letter_script
            .key(&self.keys.leased)
            .key(&self.keys.dead)
            .key(self.keys.job(&job_id))
            .arg(job_id.to_string())
            .arg(entry)
            .invoke_async(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DispatchQueue for RedisDispatchQueue {
    async fn enqueue(&self, submission: &ContentSubmission) -> Result<Uuid, QueueError> {
        let mut conn = self.connection().await?;
        let job_id = Uuid::new_v4();
        let body = serde_json::to_string(submission)?;

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(
                self.keys.job(&job_id),
                &[("body", body.as_str()), ("delivery_count", "0")],
            )
            .ignore()
            .lpush(&self.keys.pending, job_id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(job_id)
    }

    async fn dequeue(&self, max_batch: usize, visibility_timeout: Duration) -> Result<Vec<Job>, QueueError> {
        if max_batch == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let now = Utc::now();
        let visible_after = lease_deadline(now, visibility_timeout)?;

        let entries: Vec<(String, String, String, u32)> = self
            .dequeue_script
            .key(&self.keys.pending)
            .key(&self.keys.leased)
            .key(&self.keys.dead)
            .arg(now.timestamp_millis())
            .arg(visible_after.timestamp_millis())
            .arg(max_batch)
            .arg(self.policy.max_delivery_count)
            .arg(&self.keys.job_prefix)
            .arg(now.to_rfc3339())
            .arg(DELIVERY_LIMIT_REASON)
            .invoke_async(&mut conn)
            .await?;

        let mut jobs = Vec::with_capacity(entries.len());
        for (kind, id, body, delivery_count) in entries {
            let job_id = match Uuid::parse_str(&id) {
                Ok(job_id) => job_id,
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Queue holds a malformed job id");
                    continue;
                }
            };

            if kind == "dead" {
                tracing::warn!(job_id = %job_id, delivery_count, "Job moved to dead-letter list");
                metrics::counter!("moderation_jobs_dead_lettered").increment(1);
                continue;
            }

            match serde_json::from_str::<ContentSubmission>(&body) {
                Ok(submission) => jobs.push(Job {
                    job_id,
                    submission,
                    delivery_count,
                    visible_after,
                }),
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Undecodable job body, dead-lettering");
                    metrics::counter!("moderation_jobs_dead_lettered").increment(1);
                    self.dead_letter_undecodable(
                        &mut conn,
                        job_id,
                        body,
                        delivery_count,
                        format!("undecodable body: {}", e),
                    )
                    .await?;
                }
            }
        }

        Ok(jobs)
    }

    async fn acknowledge(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let id = job_id.to_string();
        let (removed,): (u32,) = redis::pipe()
            .atomic()
            .zrem(&self.keys.leased, &id)
            .ignore()
            .lrem(&self.keys.pending, 0, &id)
            .ignore()
            .del(self.keys.job(&job_id))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn extend_lease(&self, job_id: Uuid, duration: Duration) -> Result<DateTime<Utc>, QueueError> {
        let mut conn = self.connection().await?;
        let visible_after = lease_deadline(Utc::now(), duration)?;
        let extended: i64 = self
            .extend_script
            .key(&self.keys.leased)
            .arg(job_id.to_string())
            .arg(visible_after.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        if extended == 1 {
            Ok(visible_after)
        } else {
            Err(QueueError::NotLeased(job_id))
        }
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let entries: Vec<String> = conn.lrange(&self.keys.dead, 0, lrange_stop(limit)).await?;

        Ok(entries.iter().filter_map(|entry| decode_dead_letter(entry)).collect())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let (pending, leased): (u64, u64) = redis::pipe()
            .llen(&self.keys.pending)
            .zcard(&self.keys.leased)
            .query_async(&mut conn)
            .await?;
        Ok(pending + leased)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

// ── In-memory transport ─────────────────────────────────────────────────

struct StoredJob {
    submission: ContentSubmission,
    delivery_count: u32,
    leased_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MemoryState {
    ready: VecDeque<Uuid>,
    jobs: HashMap<Uuid, StoredJob>,
    dead: Vec<DeadLetter>,
}

/// Single-process queue with the same lease and dead-letter rules as the Redis one.
pub struct InMemoryDispatchQueue {
    state: Mutex<MemoryState>,
    policy: QueuePolicy,
}

impl InMemoryDispatchQueue {
    pub fn new(policy: QueuePolicy) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            policy,
        }
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    async fn enqueue(&self, submission: &ContentSubmission) -> Result<Uuid, QueueError> {
        let job_id = Uuid::new_v4();
        let mut state = self.state.lock().await;
        state.jobs.insert(
            job_id,
            StoredJob {
                submission: submission.clone(),
                delivery_count: 0,
                leased_until: None,
            },
        );
        state.ready.push_back(job_id);
        Ok(job_id)
    }

    async fn dequeue(&self, max_batch: usize, visibility_timeout: Duration) -> Result<Vec<Job>, QueueError> {
        let now = Utc::now();
        let visible_after = lease_deadline(now, visibility_timeout)?;
        let mut state = self.state.lock().await;
        let MemoryState { ready, jobs, dead } = &mut *state;

        for (job_id, job) in jobs.iter_mut() {
            if job.leased_until.is_some_and(|until| until <= now) {
                job.leased_until = None;
                ready.push_front(*job_id);
            }
        }

        let mut leased = Vec::new();
        while leased.len() < max_batch {
            let Some(job_id) = ready.pop_front() else {
                break;
            };
            let Some(job) = jobs.get_mut(&job_id) else {
                continue;
            };

            if job.delivery_count > self.policy.max_delivery_count {
                if let Some(job) = jobs.remove(&job_id) {
                    tracing::warn!(
                        job_id = %job_id,
                        content_id = %job.submission.content_id,
                        delivery_count = job.delivery_count,
                        "Job moved to dead-letter list"
                    );
                    metrics::counter!("moderation_jobs_dead_lettered").increment(1);
                    dead.push(DeadLetter {
                        job_id,
                        submission: Some(job.submission),
                        delivery_count: job.delivery_count,
                        reason: DELIVERY_LIMIT_REASON.to_string(),
                        dead_lettered_at: now,
                    });
                }
                continue;
            }

            job.delivery_count += 1;
            job.leased_until = Some(visible_after);
            leased.push(Job {
                job_id,
                submission: job.submission.clone(),
                delivery_count: job.delivery_count,
                visible_after,
            });
        }

        Ok(leased)
    }

    async fn acknowledge(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let mut state = self.state.lock().await;
        state.ready.retain(|id| *id != job_id);
        Ok(state.jobs.remove(&job_id).is_some())
    }

    async fn extend_lease(&self, job_id: Uuid, duration: Duration) -> Result<DateTime<Utc>, QueueError> {
        let visible_after = lease_deadline(Utc::now(), duration)?;
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&job_id) {
            Some(job) if job.leased_until.is_some() => {
                job.leased_until = Some(visible_after);
                Ok(visible_after)
            }
            _ => Err(QueueError::NotLeased(job_id)),
        }
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.dead.iter().rev().take(limit).cloned().collect())
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.state.lock().await.jobs.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Job {0} is not currently leased")]
    NotLeased(Uuid),

    #[error("Lease duration {0:?} is out of range")]
    InvalidDuration(Duration),

    #[error("Queue unavailable: {0}")]
    Unavailable(String),
}
