use moderation_pipeline::{
    config::AppConfig,
    db,
    services::{
        classifier::HttpClassifier,
        queue::RedisDispatchQueue,
        store::PgResultStore,
        worker::WorkerPool,
    },
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting moderation worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    config.warn_on_suspicious_settings();

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize services
    tracing::info!("Initializing services");
    let store = PgResultStore::new(db_pool, config.overwrite_policy);

    let queue = RedisDispatchQueue::new(&config.redis_url, &config.queue_prefix, config.queue_policy())
        .expect("Failed to initialize dispatch queue");

    let classifier = HttpClassifier::new(
        &config.classifier_url,
        config.classifier_api_token.clone(),
        config.toxicity_threshold,
    )
    .expect("Failed to initialize classifier client");

    let settings = config.worker_settings();
    tracing::info!(
        workers = settings.worker_count,
        batch_size = settings.batch_size,
        visibility_timeout_secs = settings.visibility_timeout.as_secs(),
        max_delivery_count = config.max_delivery_count,
        "Worker pool ready, starting job processing loops"
    );

    let pool = Arc::new(WorkerPool::new(
        Arc::new(queue),
        Arc::new(classifier),
        Arc::new(store),
        settings,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = pool.spawn(shutdown_rx);

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received, finishing in-flight jobs");
    shutdown_tx.send(true).ok();

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }

    tracing::info!("All workers stopped");
}
