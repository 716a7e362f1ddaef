use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::queries;
use crate::models::job::Job;

/// Persistence of job records. Only the orchestrator writes.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), RepositoryError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, RepositoryError>;

    /// Persist the terminal state of a job that is still open in the store.
    async fn finish(&self, job: &Job) -> Result<(), RepositoryError>;

    async fn health_check(&self) -> Result<(), RepositoryError>;
}

#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn insert(&self, job: &Job) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(RepositoryError::Duplicate(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, RepositoryError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn finish(&self, job: &Job) -> Result<(), RepositoryError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(stored) if !stored.status.is_terminal() => {
                *stored = job.clone();
                Ok(())
            }
            _ => Err(RepositoryError::NotOpen(job.id)),
        }
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: &Job) -> Result<(), RepositoryError> {
        Ok(queries::create_job(&self.pool, job).await?)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, RepositoryError> {
        Ok(queries::get_job(&self.pool, job_id).await?)
    }

    async fn finish(&self, job: &Job) -> Result<(), RepositoryError> {
        if queries::finish_job(&self.pool, job).await? {
            Ok(())
        } else {
            Err(RepositoryError::NotOpen(job.id))
        }
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} already exists")]
    Duplicate(Uuid),

    #[error("Job {0} is missing or already terminal")]
    NotOpen(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{FailureReason, JobStatus};
    use crate::models::request::{JobParameters, Mode};

    #[tokio::test]
    async fn test_finish_only_applies_once() {
        let repo = MemoryJobRepository::new();
        let mut job = Job::new(Mode::Beautify, JobParameters::default());
        repo.insert(&job).await.unwrap();

        job.fail(FailureReason::MissingImage, None).unwrap();
        repo.finish(&job).await.unwrap();
        assert!(matches!(
            repo.finish(&job).await,
            Err(RepositoryError::NotOpen(_))
        ));

        let stored = repo.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.failure_reason, Some(FailureReason::MissingImage));
    }
}
