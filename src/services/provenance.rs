use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::db::image_queries;
use crate::models::image::{ContentHash, ImageRecord};

/// Content-hash keyed store of image provenance.
///
/// Records are immutable: the first record written for a hash wins.
#[async_trait]
pub trait ProvenanceStore: Send + Sync {
    async fn get(&self, hash: &ContentHash) -> Result<Option<ImageRecord>, StoreError>;

    /// Atomically insert `record` unless its hash is already known.
    /// Returns whichever record is stored afterwards.
    async fn insert_if_absent(&self, record: ImageRecord) -> Result<ImageRecord, StoreError>;
}

/// In-process store, used in tests and database-less deployments.
#[derive(Default)]
pub struct MemoryProvenanceStore {
    records: RwLock<HashMap<ContentHash, ImageRecord>>,
}

impl MemoryProvenanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ProvenanceStore for MemoryProvenanceStore {
    async fn get(&self, hash: &ContentHash) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.records.read().await.get(hash).cloned())
    }

    async fn insert_if_absent(&self, record: ImageRecord) -> Result<ImageRecord, StoreError> {
        let mut records = self.records.write().await;
        Ok(records
            .entry(record.content_hash.clone())
            .or_insert(record)
            .clone())
    }
}

/// PostgreSQL-backed store (`image_records` table).
pub struct PgProvenanceStore {
    pool: PgPool,
}

impl PgProvenanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProvenanceStore for PgProvenanceStore {
    async fn get(&self, hash: &ContentHash) -> Result<Option<ImageRecord>, StoreError> {
        Ok(image_queries::find_image_record(&self.pool, hash).await?)
    }

    async fn insert_if_absent(&self, record: ImageRecord) -> Result<ImageRecord, StoreError> {
        if image_queries::insert_image_record_if_absent(&self.pool, &record).await? {
            return Ok(record);
        }
        image_queries::find_image_record(&self.pool, &record.content_hash)
            .await?
            .ok_or_else(|| StoreError::Vanished(record.content_hash.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Image record {0} disappeared after a conflicting insert")]
    Vanished(ContentHash),
}
