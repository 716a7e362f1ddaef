use std::sync::Arc;

use face2_pipeline::{
    config::AppConfig,
    db,
    models::image::{ContentHash, ImageRecord, Provenance},
    models::job::{FailureReason, Job, JobStatus},
    models::request::{JobParameters, Mode},
    services::{
        encryption::EncryptionService,
        jobs::{JobRepository, PgJobRepository},
        provenance::{PgProvenanceStore, ProvenanceStore},
        storage::{log_key, ArtifactStore, R2ArtifactStore, JSON_CONTENT_TYPE},
    },
};
use uuid::Uuid;

async fn connect(config: &AppConfig) -> sqlx::PgPool {
    let url = config
        .database_url
        .as_deref()
        .expect("DATABASE_URL must be set for integration tests");
    let pool = db::init_pool(url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Integration test: provenance records in PostgreSQL
///
/// Note: This requires a running PostgreSQL instance
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_provenance_first_record_wins() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let store = PgProvenanceStore::new(connect(&config).await);

    let hash = ContentHash::of(Uuid::new_v4().as_bytes());
    let job_id = Uuid::new_v4();

    let stored = store
        .insert_if_absent(ImageRecord::new(
            hash.clone(),
            Provenance::Derivative,
            Some(job_id),
        ))
        .await
        .expect("Insert failed");
    assert!(stored.is_derivative());

    // A later Original claim for the same bytes does not overwrite it.
    let again = store
        .insert_if_absent(ImageRecord::new(hash.clone(), Provenance::Original, None))
        .await
        .expect("Insert failed");
    assert!(again.is_derivative());
    assert_eq!(again.job_id, Some(job_id));

    let fetched = store.get(&hash).await.unwrap().expect("Record missing");
    assert!(fetched.is_derivative());

    println!("✓ Provenance records are immutable");
}

/// Integration test: job records in PostgreSQL
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_job_repository_lifecycle() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let repo = PgJobRepository::new(connect(&config).await);
    repo.health_check().await.expect("Health check failed");

    let mut job = Job::new(Mode::Anonymize, JobParameters::default());
    job.before_hash = Some(ContentHash::of(b"integration-before"));
    repo.insert(&job).await.expect("Failed to create job");

    let retrieved = repo.get(job.id).await.unwrap().expect("Job not found");
    assert_eq!(retrieved.status, JobStatus::Processing);
    assert_eq!(retrieved.mode, Mode::Anonymize);
    assert_eq!(retrieved.before_hash, job.before_hash);

    job.complete(
        format!("outputs/{}.png", job.id),
        format!("logs/{}.json", job.id),
    )
    .unwrap();
    repo.finish(&job).await.expect("Failed to finish job");

    let finished = repo.get(job.id).await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    assert!(finished.output_ref.is_some());
    assert!(finished.completed_at.is_some());

    // A terminal job cannot be finished a second time.
    let mut late = finished.clone();
    late.status = JobStatus::Failed;
    late.failure_reason = Some(FailureReason::FallbackInternal);
    assert!(repo.finish(&late).await.is_err());
    assert_eq!(
        repo.get(job.id).await.unwrap().unwrap().status,
        JobStatus::Completed
    );

    println!("✓ Job repository lifecycle verified");
}

/// Integration test: encrypted artifacts in R2
///
/// Note: This requires R2 credentials and ENCRYPTION_KEY
/// configured via environment variables.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_r2_artifacts_are_encrypted_at_rest() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let r2 = config
        .r2()
        .expect("Incomplete R2 configuration")
        .expect("R2 is not configured");

    let encryption =
        Arc::new(EncryptionService::new(r2.encryption_key).expect("Failed to initialize encryption"));
    let store = R2ArtifactStore::new(
        r2.bucket,
        r2.endpoint,
        r2.access_key,
        r2.secret_key,
        encryption,
    )
    .expect("Failed to initialize R2");

    let key = log_key(Uuid::new_v4());
    let payload = br#"{"status":"completed"}"#;
    store
        .put(&key, payload, JSON_CONTENT_TYPE)
        .await
        .expect("R2 upload failed");

    let downloaded = store.get(&key).await.expect("R2 download failed");
    assert_eq!(downloaded.as_deref(), Some(&payload[..]));

    let missing = store
        .get(&log_key(Uuid::new_v4()))
        .await
        .expect("R2 lookup failed");
    assert!(missing.is_none());

    println!("✓ R2 artifact round trip verified");
}
