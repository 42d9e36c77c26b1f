use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use moderation_pipeline::{
    app_state::AppState,
    config::AppConfig,
    db, routes,
    services::{
        broadcaster::TopicBroadcaster,
        ingress::IngressService,
        queue::{DispatchQueue, RedisDispatchQueue},
        store::PgResultStore,
    },
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

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");
    config.warn_on_suspicious_settings();

    tracing::info!("Initializing moderation ingress server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe_pipeline_metrics();

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL verdict store");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let store = Arc::new(PgResultStore::new(db_pool, config.overwrite_policy));

    // Initialize Redis dispatch queue and the topic it subscribes to
    tracing::info!(prefix = %config.queue_prefix, "Connecting to Redis dispatch queue");
    let queue: Arc<dyn DispatchQueue> = Arc::new(
        RedisDispatchQueue::new(&config.redis_url, &config.queue_prefix, config.queue_policy())
            .expect("Failed to initialize dispatch queue"),
    );
    let broadcaster = TopicBroadcaster::new(vec![queue.clone()], config.publish_attempts);

    let ingress = IngressService::new(Arc::new(broadcaster), config.submission_limits());
    let state = AppState::new(ingress, store, queue);

    let app = routes::api_router(state).merge(routes::metrics::metrics_router(prometheus_handle));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown signal received");
        })
        .await
        .expect("Server error");
}
