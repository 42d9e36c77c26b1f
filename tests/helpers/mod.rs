//! Test helper utilities for running the pipeline in-process

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use moderation_pipeline::{
    app_state::AppState,
    models::{
        job::QueuePolicy,
        submission::SubmissionLimits,
        verdict::{LabelScore, OverwritePolicy, Verdict},
    },
    routes,
    services::{
        broadcaster::{Broadcaster, TopicBroadcaster},
        classifier::{ClassifierError, ModerationClassifier},
        ingress::IngressService,
        queue::{DispatchQueue, InMemoryDispatchQueue},
        store::{InMemoryResultStore, ResultStore},
        worker::{WorkerPool, WorkerSettings},
    },
};

/// Classifier keyed on payload text:
/// `malformed` is rejected, `slow` never answers in time, anything containing
/// `toxic` is flagged, the rest is clean.
#[derive(Default)]
pub struct KeywordClassifier {
    pub calls: AtomicU32,
}

#[async_trait]
impl ModerationClassifier for KeywordClassifier {
    async fn classify(&self, payload: &str, _timeout: Duration) -> Result<Verdict, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match payload {
            "malformed" => Err(ClassifierError::Permanent("unsupported language".to_string())),
            "slow" => {
                sleep(Duration::from_secs(5)).await;
                Ok(Verdict::clean())
            }
            p if p.contains("toxic") => Ok(Verdict::from_scores(
                0.95,
                vec![LabelScore {
                    name: "PROFANITY".to_string(),
                    score: 0.95,
                }],
                0.3,
            )),
            _ => Ok(Verdict::from_scores(0.01, Vec::new(), 0.3)),
        }
    }
}

/// API server plus worker pool over in-memory transports.
pub struct TestPipeline {
    pub base_url: String,
    pub queue: Arc<InMemoryDispatchQueue>,
    pub store: Arc<InMemoryResultStore>,
    pub classifier: Arc<KeywordClassifier>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl TestPipeline {
    pub async fn stop(self) {
        self.shutdown.send(true).ok();
        for worker in self.workers {
            worker.await.expect("worker panicked");
        }
    }
}

pub fn fast_settings(worker_count: usize, visibility_timeout: Duration) -> WorkerSettings {
    WorkerSettings {
        worker_count,
        batch_size: 4,
        visibility_timeout,
        classifier_timeout: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
    }
}

/// Bind the API router on an ephemeral port and return its base URL.
pub async fn serve(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("listener has no address");
    let app = routes::api_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });
    format!("http://{}", addr)
}

pub async fn spawn_pipeline(policy: QueuePolicy, settings: WorkerSettings) -> TestPipeline {
    let queue = Arc::new(InMemoryDispatchQueue::new(policy));
    let store = Arc::new(InMemoryResultStore::new(OverwritePolicy::LastWriteWins));
    let classifier = Arc::new(KeywordClassifier::default());

    let broadcaster: Arc<dyn Broadcaster> =
        Arc::new(TopicBroadcaster::new(vec![queue.clone() as Arc<dyn DispatchQueue>], 3));
    let ingress = IngressService::new(broadcaster, SubmissionLimits { max_payload_bytes: 1024 });
    let base_url = serve(AppState::new(
        ingress,
        store.clone() as Arc<dyn ResultStore>,
        queue.clone(),
    ))
    .await;

    let pool = Arc::new(WorkerPool::new(
        queue.clone(),
        classifier.clone(),
        store.clone(),
        settings,
    ));
    let (shutdown, shutdown_rx) = watch::channel(false);
    let workers = pool.spawn(shutdown_rx);

    TestPipeline {
        base_url,
        queue,
        store,
        classifier,
        shutdown,
        workers,
    }
}

/// POST a JSON body to the submission endpoint.
pub async fn submit(client: &reqwest::Client, base_url: &str, body: Value) -> reqwest::Response {
    client
        .post(format!("{}/api/v1/content", base_url))
        .json(&body)
        .send()
        .await
        .expect("submission request failed")
}

/// Poll the lookup endpoint until a verdict exists or `timeout` passes.
pub async fn wait_for_verdict(
    client: &reqwest::Client,
    base_url: &str,
    content_id: &str,
    timeout: Duration,
) -> Option<Value> {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        let response = client
            .get(format!("{}/api/v1/content/{}", base_url, content_id))
            .send()
            .await
            .expect("lookup request failed");
        if response.status().is_success() {
            return Some(response.json().await.expect("lookup body is not JSON"));
        }
        sleep(Duration::from_millis(10)).await;
    }
    None
}
