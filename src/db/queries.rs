use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::image::ContentHash;
use crate::models::job::{FailureReason, Job, JobStatus};
use crate::models::request::Mode;

/// Insert a new job
pub async fn create_job(pool: &PgPool, job: &Job) -> Result<(), sqlx::Error> {
    let parameters = serde_json::to_value(&job.parameters)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        INSERT INTO jobs (id, mode, before_hash, after_hash, parameters, status,
                          failure_reason, output_ref, job_log_ref, created_at, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        "#,
    )
    .bind(job.id)
    .bind(job.mode.to_string())
    .bind(job.before_hash.as_ref().map(ContentHash::as_str))
    .bind(job.after_hash.as_ref().map(ContentHash::as_str))
    .bind(parameters)
    .bind(job.status.to_string())
    .bind(job.failure_reason.map(|r| r.to_string()))
    .bind(job.output_ref.as_deref())
    .bind(job.job_log_ref.as_deref())
    .bind(job.created_at)
    .bind(job.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, mode, before_hash, after_hash, parameters, status, failure_reason,
               output_ref, job_log_ref, created_at, completed_at
        FROM jobs
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.map(|r| job_from_row(&r)).transpose()
}

/// Move a job into a terminal state. Rows that are already terminal are left untouched.
///
/// Returns `false` when no open job with that ID exists.
pub async fn finish_job(pool: &PgPool, job: &Job) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET status = $1,
            failure_reason = $2,
            output_ref = $3,
            job_log_ref = $4,
            completed_at = $5
        WHERE id = $6
          AND status = 'processing'
        "#,
    )
    .bind(job.status.to_string())
    .bind(job.failure_reason.map(|r| r.to_string()))
    .bind(job.output_ref.as_deref())
    .bind(job.job_log_ref.as_deref())
    .bind(job.completed_at)
    .bind(job.id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn job_from_row(r: &PgRow) -> Result<Job, sqlx::Error> {
    let mode: String = r.try_get("mode")?;
    let status: String = r.try_get("status")?;
    let failure_reason: Option<String> = r.try_get("failure_reason")?;
    let parameters: serde_json::Value = r.try_get("parameters")?;
    let before_hash: Option<String> = r.try_get("before_hash")?;
    let after_hash: Option<String> = r.try_get("after_hash")?;

    Ok(Job {
        id: r.try_get("id")?,
        mode: mode.parse::<Mode>().map_err(decode_error)?,
        before_hash: before_hash.map(ContentHash::from_hex),
        after_hash: after_hash.map(ContentHash::from_hex),
        parameters: serde_json::from_value(parameters).map_err(decode_error)?,
        status: status.parse::<JobStatus>().map_err(decode_error)?,
        failure_reason: failure_reason
            .map(|r| r.parse::<FailureReason>())
            .transpose()
            .map_err(decode_error)?,
        output_ref: r.try_get("output_ref")?,
        job_log_ref: r.try_get("job_log_ref")?,
        created_at: r.try_get("created_at")?,
        completed_at: r.try_get("completed_at")?,
    })
}

fn decode_error<E>(e: E) -> sqlx::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    sqlx::Error::Decode(Box::new(e))
}
