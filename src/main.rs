use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use face2_pipeline::app_state::AppState;
use face2_pipeline::config::AppConfig;
use face2_pipeline::db;
use face2_pipeline::routes;
use face2_pipeline::services::{
    encryption::EncryptionService,
    generation::GeminiClient,
    jobs::{JobRepository, MemoryJobRepository, PgJobRepository},
    orchestrator::JobOrchestrator,
    provenance::{MemoryProvenanceStore, PgProvenanceStore, ProvenanceStore},
    storage::{ArtifactStore, LocalArtifactStore, R2ArtifactStore},
    video::{VeoBackend, VideoClient},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing face2-pipeline server");

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("face2_jobs_submitted_total", "Jobs submitted, by mode");
    metrics::describe_counter!(
        "face2_jobs_completed_total",
        "Jobs completed, by mode and generation path"
    );
    metrics::describe_counter!("face2_jobs_failed_total", "Jobs failed, by reason");
    metrics::describe_counter!(
        "face2_generation_attempts_total",
        "Generation model calls, by outcome"
    );
    metrics::describe_histogram!(
        "face2_job_processing_seconds",
        "Time from submission to a completed job"
    );

    // Job and provenance stores: PostgreSQL when configured, otherwise in-process
    let (jobs, provenance): (Arc<dyn JobRepository>, Arc<dyn ProvenanceStore>) =
        match &config.database_url {
            Some(url) => {
                tracing::info!("Connecting to PostgreSQL database");
                let pool = db::init_pool(url, config.database_max_connections)
                    .await
                    .expect("Failed to connect to database");
                tracing::info!("Running database migrations");
                db::run_migrations(&pool)
                    .await
                    .expect("Failed to run database migrations");
                (
                    Arc::new(PgJobRepository::new(pool.clone())),
                    Arc::new(PgProvenanceStore::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, jobs and provenance are kept in memory");
                (
                    Arc::new(MemoryJobRepository::new()),
                    Arc::new(MemoryProvenanceStore::new()),
                )
            }
        };

    let artifacts: Arc<dyn ArtifactStore> =
        match config.r2().expect("Incomplete R2 configuration") {
            Some(r2) => {
                tracing::info!(bucket = r2.bucket, "Using encrypted R2 artifact storage");
                let encryption = EncryptionService::new(r2.encryption_key)
                    .expect("Failed to initialize encryption");
                Arc::new(
                    R2ArtifactStore::new(
                        r2.bucket,
                        r2.endpoint,
                        r2.access_key,
                        r2.secret_key,
                        Arc::new(encryption),
                    )
                    .expect("Failed to initialize R2 client"),
                )
            }
            None => {
                tracing::info!(root = %config.artifact_dir, "Using local artifact storage");
                Arc::new(LocalArtifactStore::new(&config.artifact_dir))
            }
        };

    tracing::info!(model = %config.gemini_model, "Initializing Gemini client");
    let generation =
        GeminiClient::new(config.gemini()).expect("Failed to initialize Gemini client");

    let veo = VeoBackend::new(
        config.gemini_api_key.clone(),
        config.gemini_api_base.clone(),
        config.gemini_video_model.clone(),
        config.generation_timeout(),
    )
    .expect("Failed to initialize Veo client");
    let video = VideoClient::new(Arc::new(veo));

    let orchestrator = JobOrchestrator::new(
        Arc::new(generation),
        provenance,
        jobs,
        artifacts,
        config.pipeline_settings(),
    );
    let state = AppState::new(orchestrator, video);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/jobs", post(routes::jobs::submit_job))
        .route("/api/v1/jobs/{id}", get(routes::jobs::get_job_status))
        .route("/api/v1/jobs/{id}/image", get(routes::jobs::get_job_image))
        .route(
            "/api/v1/jobs/{id}/feedback",
            post(routes::jobs::submit_feedback),
        )
        .route("/api/v1/videos", post(routes::videos::generate_video))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    tracing::info!("Starting face2-pipeline on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
