//! PostgreSQL persistence for job records and image provenance.

pub mod image_queries;
pub mod queries;

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

/// Connect a pool shared by the job repository and the provenance store.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .connect(database_url)
        .await
}

/// Apply the `jobs` and `image_records` schema.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
