//! End-to-end pipeline tests over in-memory transports
//!
//! The real axum router is served on an ephemeral port and a worker pool
//! consumes from the same in-memory queue, so every request goes through
//! ingress -> broadcaster -> queue -> worker -> store.

mod helpers;

use futures::future::join_all;
use helpers::*;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use moderation_pipeline::{
    app_state::AppState,
    models::{job::QueuePolicy, submission::SubmissionLimits},
    services::{
        broadcaster::TopicBroadcaster, ingress::IngressService, queue::{DispatchQueue, InMemoryDispatchQueue},
        store::InMemoryResultStore,
    },
};

const LEASE: Duration = Duration::from_secs(2);
const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_clean_submission_reaches_complete_verdict() {
    let pipeline = spawn_pipeline(QueuePolicy::default(), fast_settings(2, LEASE)).await;
    let client = reqwest::Client::new();

    let response = submit(&client, &pipeline.base_url, json!({ "content_id": "c1", "payload": "hello" })).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "content_id": "c1", "status": "accepted" }));

    let verdict = wait_for_verdict(&client, &pipeline.base_url, "c1", WAIT)
        .await
        .expect("verdict never appeared");
    assert_eq!(verdict["status"], "complete");
    assert_eq!(verdict["verdict"]["outcome"], "clean");

    pipeline.stop().await;
}

#[tokio::test]
async fn test_permanent_classifier_error_is_recorded_as_failed() {
    let pipeline = spawn_pipeline(QueuePolicy::default(), fast_settings(1, LEASE)).await;
    let client = reqwest::Client::new();

    submit(&client, &pipeline.base_url, json!({ "content_id": "bad-1", "payload": "malformed" })).await;

    let verdict = wait_for_verdict(&client, &pipeline.base_url, "bad-1", WAIT)
        .await
        .expect("failed verdict never appeared");
    assert_eq!(verdict["status"], "failed");
    assert!(verdict["verdict"].is_null());

    // Acknowledged, not retried.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pipeline.queue.depth().await.unwrap(), 0);
    assert_eq!(pipeline.classifier.calls.load(Ordering::SeqCst), 1);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_repeated_timeouts_dead_letter_and_lookup_stays_not_found() {
    let policy = QueuePolicy { max_delivery_count: 5 };
    let pipeline = spawn_pipeline(policy, fast_settings(1, Duration::from_millis(50))).await;
    let client = reqwest::Client::new();

    submit(&client, &pipeline.base_url, json!({ "content_id": "slow-1", "payload": "slow" })).await;

    let deadline = tokio::time::Instant::now() + WAIT;
    let dead = loop {
        let dead = pipeline.queue.dead_letters(10).await.unwrap();
        if !dead.is_empty() || tokio::time::Instant::now() > deadline {
            break dead;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].delivery_count, 6);
    assert_eq!(pipeline.classifier.calls.load(Ordering::SeqCst), 6);

    let lookup = client
        .get(format!("{}/api/v1/content/slow-1", pipeline.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(lookup.status(), StatusCode::NOT_FOUND);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_concurrent_submissions_do_not_cross_contaminate() {
    let pipeline = spawn_pipeline(QueuePolicy::default(), fast_settings(4, LEASE)).await;
    let client = reqwest::Client::new();

    let submissions = (0..20).map(|i| {
        let payload = if i % 2 == 0 { "friendly note" } else { "toxic rant" };
        let body = json!({ "content_id": format!("item-{}", i), "payload": payload });
        let client = client.clone();
        let base_url = pipeline.base_url.clone();
        async move { submit(&client, &base_url, body).await.status() }
    });
    for status in join_all(submissions).await {
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    for i in 0..20 {
        let id = format!("item-{}", i);
        let verdict = wait_for_verdict(&client, &pipeline.base_url, &id, WAIT)
            .await
            .expect("verdict never appeared");
        let expected = if i % 2 == 0 { "clean" } else { "flagged" };
        assert_eq!(verdict["content_id"], id.as_str());
        assert_eq!(verdict["verdict"]["outcome"], expected);
    }
    assert_eq!(pipeline.store.len(), 20);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_generated_id_and_legacy_field_names() {
    let pipeline = spawn_pipeline(QueuePolicy::default(), fast_settings(1, LEASE)).await;
    let client = reqwest::Client::new();

    let response = submit(&client, &pipeline.base_url, json!({ "text": "hello there" })).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    let content_id = body["content_id"].as_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&content_id).is_ok());

    assert!(wait_for_verdict(&client, &pipeline.base_url, &content_id, WAIT).await.is_some());

    pipeline.stop().await;
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected_synchronously() {
    let pipeline = spawn_pipeline(QueuePolicy::default(), fast_settings(1, LEASE)).await;
    let client = reqwest::Client::new();

    let empty = submit(&client, &pipeline.base_url, json!({ "payload": "   " })).await;
    assert_eq!(empty.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = empty.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("payload"));

    let oversized = submit(&client, &pipeline.base_url, json!({ "payload": "x".repeat(2048) })).await;
    assert_eq!(oversized.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let bad_id = submit(&client, &pipeline.base_url, json!({ "content_id": "no spaces", "payload": "hi" })).await;
    assert_eq!(bad_id.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let not_json = client
        .post(format!("{}/api/v1/content", pipeline.base_url))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(not_json.status(), StatusCode::BAD_REQUEST);

    assert_eq!(pipeline.queue.depth().await.unwrap(), 0);
    pipeline.stop().await;
}

#[tokio::test]
async fn test_unknown_content_is_not_found() {
    let pipeline = spawn_pipeline(QueuePolicy::default(), fast_settings(1, LEASE)).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/v1/content/never-submitted", pipeline.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("never-submitted"));

    pipeline.stop().await;
}

#[tokio::test]
async fn test_publish_failure_returns_service_unavailable() {
    // A topic without subscribers cannot durably accept anything.
    let ingress = IngressService::new(
        Arc::new(TopicBroadcaster::new(Vec::new(), 1)),
        SubmissionLimits::default(),
    );
    let base_url = serve(AppState::new(
        ingress,
        Arc::new(InMemoryResultStore::default()),
        Arc::new(InMemoryDispatchQueue::new(QueuePolicy::default())),
    ))
    .await;
    let client = reqwest::Client::new();

    let response = submit(&client, &base_url, json!({ "payload": "hello" })).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_health_reports_components() {
    let pipeline = spawn_pipeline(QueuePolicy::default(), fast_settings(1, LEASE)).await;

    let response = reqwest::get(format!("{}/health", pipeline.base_url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["queue"]["status"], "ok");

    pipeline.stop().await;
}
