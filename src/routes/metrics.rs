use axum::extract::State;
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Register descriptions for the pipeline's metrics.
pub fn describe_pipeline_metrics() {
    metrics::describe_counter!(
        "moderation_submissions_total",
        "Submissions accepted and published"
    );
    metrics::describe_counter!(
        "moderation_submissions_rejected",
        "Submissions rejected by validation"
    );
    metrics::describe_counter!(
        "moderation_jobs_completed",
        "Jobs that produced a complete verdict"
    );
    metrics::describe_counter!(
        "moderation_jobs_failed",
        "Jobs recorded as failed after a permanent classifier error"
    );
    metrics::describe_counter!(
        "moderation_jobs_retried",
        "Deliveries left unacknowledged for redelivery"
    );
    metrics::describe_counter!(
        "moderation_jobs_dead_lettered",
        "Jobs moved to the dead-letter list"
    );
    metrics::describe_histogram!(
        "moderation_processing_seconds",
        "Time from lease to acknowledgment for one job"
    );
    metrics::describe_gauge!(
        "moderation_queue_depth",
        "Jobs waiting or leased in the dispatch queue"
    );
}

/// `/metrics` route, served with its own state.
pub fn metrics_router(handle: Arc<PrometheusHandle>) -> Router {
    Router::new()
        .route("/metrics", get(prometheus_metrics))
        .with_state(handle)
}

/// Prometheus text exposition of the recorder's current values.
async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
