use sqlx::{PgPool, Row};

use crate::models::image::{ContentHash, ImageRecord, Provenance};

/// Look up the provenance record of an image by content hash
pub async fn find_image_record(
    pool: &PgPool,
    hash: &ContentHash,
) -> Result<Option<ImageRecord>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT content_hash, provenance, job_id, recorded_at
        FROM image_records
        WHERE content_hash = $1
        "#,
    )
    .bind(hash.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(|r| {
        let content_hash: String = r.try_get("content_hash")?;
        let provenance: String = r.try_get("provenance")?;
        Ok(ImageRecord {
            content_hash: ContentHash::from_hex(content_hash),
            provenance: provenance
                .parse::<Provenance>()
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            job_id: r.try_get("job_id")?,
            recorded_at: r.try_get("recorded_at")?,
        })
    })
    .transpose()
}

/// Insert a record unless one already exists for the hash.
///
/// Returns `true` when the row was written.
pub async fn insert_image_record_if_absent(
    pool: &PgPool,
    record: &ImageRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO image_records (content_hash, provenance, job_id, recorded_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (content_hash) DO NOTHING
        "#,
    )
    .bind(record.content_hash.as_str())
    .bind(record.provenance.to_string())
    .bind(record.job_id)
    .bind(record.recorded_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
