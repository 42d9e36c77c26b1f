use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sqlx::PgPool;

use crate::db::queries;
use crate::models::verdict::{should_replace, OverwritePolicy, UpsertOutcome, VerdictRecord};

/// Durable verdict storage keyed by content id.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Idempotent upsert. Repeating a write leaves the stored state unchanged.
    async fn upsert(&self, record: &VerdictRecord) -> Result<UpsertOutcome, StoreError>;

    /// `Ok(None)` means no verdict has been written for this id yet.
    async fn get(&self, content_id: &str) -> Result<Option<VerdictRecord>, StoreError>;

    /// Check storage connectivity (for health checks).
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed result store.
pub struct PgResultStore {
    pool: PgPool,
    policy: OverwritePolicy,
}

impl PgResultStore {
    pub fn new(pool: PgPool, policy: OverwritePolicy) -> Self {
        Self { pool, policy }
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn upsert(&self, record: &VerdictRecord) -> Result<UpsertOutcome, StoreError> {
        Ok(queries::upsert_verdict(&self.pool, record, self.policy).await?)
    }

    async fn get(&self, content_id: &str) -> Result<Option<VerdictRecord>, StoreError> {
        Ok(queries::get_verdict(&self.pool, content_id).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// In-process store for tests and single-node runs.
///
/// The entry API holds the shard lock for the compare-and-replace, so
/// concurrent writers for one id serialize the same way the SQL upsert does.
pub struct InMemoryResultStore {
    records: DashMap<String, VerdictRecord>,
    policy: OverwritePolicy,
}

impl InMemoryResultStore {
    pub fn new(policy: OverwritePolicy) -> Self {
        Self {
            records: DashMap::new(),
            policy,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryResultStore {
    fn default() -> Self {
        Self::new(OverwritePolicy::default())
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn upsert(&self, record: &VerdictRecord) -> Result<UpsertOutcome, StoreError> {
        let outcome = match self.records.entry(record.content_id.clone()) {
            Entry::Occupied(mut current) => {
                if should_replace(Some(current.get()), record, self.policy) {
                    current.insert(record.clone());
                    UpsertOutcome::Updated
                } else {
                    UpsertOutcome::Unchanged
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                UpsertOutcome::Inserted
            }
        };
        Ok(outcome)
    }

    async fn get(&self, content_id: &str) -> Result<Option<VerdictRecord>, StoreError> {
        Ok(self.records.get(content_id).map(|entry| entry.value().clone()))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
