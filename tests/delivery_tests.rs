// Delivery engine tests against a local collector: ack, integrity, retries, offline, batch

mod common;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use common::{online_client, spawn_collector, temp_repo};
use devmon::delivery::batch::deliver_pending;
use devmon::delivery::{
    CONTRACT_HEADER, DeliveryClient, DeliveryConfig, DeliveryError, DeliveryOutcome,
};
use devmon::metrics_repo::MetricsRepo;
use devmon::models::{Aggregate, DeviceSummary, aggregation_key};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct Received {
    bodies: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

impl Received {
    fn len(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }
}

fn record(state: &Received, headers: &HeaderMap, body: &Value) {
    let contract = headers
        .get(CONTRACT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.bodies.lock().unwrap().push((contract, body.clone()));
}

/// Well-behaved collector: acks and echoes the body back.
async fn echo_ok(
    State(state): State<Received>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    record(&state, &headers, &body);
    Json(json!({"uid": "ack-123", "params": body}))
}

async fn server_error(State(state): State<Received>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
    record(&state, &headers, &body);
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn not_json() -> &'static str {
    "ok"
}

async fn no_ack() -> Json<Value> {
    Json(json!({"status": "received"}))
}

async fn wrong_echo() -> Json<Value> {
    Json(json!({"uid": "ack-999", "params": {"aggregation_time": "tampered"}}))
}

async fn collector(handler: axum::routing::MethodRouter<Received>) -> (String, Received) {
    let state = Received::default();
    let router = Router::new()
        .route("/ingest", handler)
        .with_state(state.clone());
    (spawn_collector(router).await, state)
}

fn summary() -> DeviceSummary {
    DeviceSummary {
        device_id: "GPU-1".into(),
        name: "RTX".into(),
        stats: BTreeMap::from([
            ("memory_used_mb_mean".to_string(), 5632.0),
            ("memory_used_mb_min".to_string(), 5120.0),
            ("memory_used_mb_max".to_string(), 6144.0),
        ]),
    }
}

async fn pending(repo: &MetricsRepo, key: &str) -> Aggregate {
    repo.save_aggregate(key, &[summary()]).await.unwrap();
    repo.get_aggregate(key).await.unwrap().unwrap()
}

const KEY: &str = "2025-01-01T10:00:00";

#[tokio::test]
async fn successful_delivery_marks_sent_and_logs_ack() {
    let (_dir, repo) = temp_repo().await;
    let (url, received) = collector(post(echo_ok)).await;
    let client = online_client(&url);
    let aggregate = pending(&repo, KEY).await;

    let outcome = client.deliver(&repo, &aggregate).await.unwrap();
    assert_eq!(
        outcome,
        DeliveryOutcome::Delivered {
            ack_id: "ack-123".into(),
            attempt_number: 1
        }
    );

    let bodies = received.bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    let (contract, body) = &bodies[0];
    assert_eq!(contract.as_deref(), Some("TEST-123"));
    assert_eq!(body["aggregation_time"], KEY);
    assert_eq!(body["contract_number"], "TEST-123");
    assert_eq!(body["devices"][0]["device_id"], "GPU-1");
    assert_eq!(body["devices"][0]["memory_used_mb_mean"], 5632.0);

    assert!(repo.get_aggregate(KEY).await.unwrap().unwrap().sent);
    let attempts = repo.get_attempts(KEY).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].success);
    assert_eq!(attempts[0].ack_id.as_deref(), Some("ack-123"));
    let logged: Value = serde_json::from_str(&attempts[0].params).unwrap();
    assert_eq!(&logged, body);
}

#[tokio::test]
async fn server_error_is_logged_and_leaves_unsent() {
    let (_dir, repo) = temp_repo().await;
    let (url, received) = collector(post(server_error)).await;
    let client = online_client(&url);
    let aggregate = pending(&repo, KEY).await;

    let err = client.deliver(&repo, &aggregate).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Status(500)));
    assert_eq!(received.len(), 1);

    let agg = repo.get_aggregate(KEY).await.unwrap().unwrap();
    assert!(!agg.sent);
    assert_eq!(
        agg.last_error.as_deref(),
        Some("server returned non-success status: 500")
    );
    let attempts = repo.get_attempts(KEY).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].success);
}

#[tokio::test]
async fn non_json_response_is_invalid() {
    let (_dir, repo) = temp_repo().await;
    let (url, _) = collector(post(not_json)).await;
    let client = online_client(&url);
    let aggregate = pending(&repo, KEY).await;

    let err = client.deliver(&repo, &aggregate).await.unwrap_err();
    assert!(matches!(err, DeliveryError::InvalidResponse));
    assert!(!repo.get_aggregate(KEY).await.unwrap().unwrap().sent);
}

#[tokio::test]
async fn response_without_ack_fails() {
    let (_dir, repo) = temp_repo().await;
    let (url, _) = collector(post(no_ack)).await;
    let client = online_client(&url);
    let aggregate = pending(&repo, KEY).await;

    let err = client.deliver(&repo, &aggregate).await.unwrap_err();
    assert!(matches!(err, DeliveryError::MissingAck));
    let attempts = repo.get_attempts(KEY).await.unwrap();
    assert_eq!(
        attempts[0].error.as_deref(),
        Some("response missing acknowledgment id")
    );
}

#[tokio::test]
async fn echo_mismatch_fails_but_keeps_ack() {
    let (_dir, repo) = temp_repo().await;
    let (url, _) = collector(post(wrong_echo)).await;
    let client = online_client(&url);
    let aggregate = pending(&repo, KEY).await;

    let err = client.deliver(&repo, &aggregate).await.unwrap_err();
    assert!(matches!(err, DeliveryError::IntegrityMismatch { .. }));
    assert!(!repo.get_aggregate(KEY).await.unwrap().unwrap().sent);
    let attempts = repo.get_attempts(KEY).await.unwrap();
    assert!(!attempts[0].success);
    assert_eq!(attempts[0].ack_id.as_deref(), Some("ack-999"));
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    let (_dir, repo) = temp_repo().await;
    // Bind and drop to get a port nobody listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = online_client(&format!("http://{}/ingest", addr));
    let aggregate = pending(&repo, KEY).await;

    let err = client.deliver(&repo, &aggregate).await.unwrap_err();
    assert!(matches!(err, DeliveryError::Transport(_)));
    assert!(err.to_string().starts_with("failed to send data:"));
    assert_eq!(repo.count_attempts(KEY).await.unwrap(), 1);
}

#[tokio::test]
async fn retry_ceiling_stops_without_new_rows() {
    let (_dir, repo) = temp_repo().await;
    let (url, received) = collector(post(server_error)).await;
    let client = online_client(&url);
    let aggregate = pending(&repo, KEY).await;

    for _ in 0..10 {
        assert!(client.deliver(&repo, &aggregate).await.is_err());
    }
    assert_eq!(repo.count_attempts(KEY).await.unwrap(), 10);
    assert_eq!(received.len(), 10);

    let err = client.deliver(&repo, &aggregate).await.unwrap_err();
    assert!(matches!(err, DeliveryError::MaxRetries(10)));
    assert_eq!(err.to_string(), "Maximum retry attempts (10) reached");
    // No eleventh row and no eleventh request.
    assert_eq!(repo.count_attempts(KEY).await.unwrap(), 10);
    assert_eq!(received.len(), 10);
    let numbers: Vec<u32> = repo
        .get_attempts(KEY)
        .await
        .unwrap()
        .iter()
        .map(|a| a.attempt_number)
        .collect();
    assert_eq!(numbers, (1..=10).collect::<Vec<u32>>());
}

#[tokio::test]
async fn offline_client_writes_nothing() {
    let (_dir, repo) = temp_repo().await;
    let aggregate = pending(&repo, KEY).await;
    let client = DeliveryClient::new(DeliveryConfig {
        url: "http://127.0.0.1:9/ingest".into(),
        contract_number: "TEST-123".into(),
        offline: true,
        timeout_secs: 5,
        max_retries: 10,
    })
    .unwrap();
    assert!(client.is_offline());

    let outcome = client.deliver(&repo, &aggregate).await.unwrap();
    assert_eq!(outcome, DeliveryOutcome::Offline);
    assert_eq!(repo.count_attempts(KEY).await.unwrap(), 0);
    assert!(!repo.get_aggregate(KEY).await.unwrap().unwrap().sent);
}

#[tokio::test]
async fn empty_url_counts_as_offline() {
    let client = DeliveryClient::new(DeliveryConfig {
        url: "  ".into(),
        contract_number: String::new(),
        offline: false,
        timeout_secs: 30,
        max_retries: 10,
    })
    .unwrap();
    assert!(client.is_offline());
}

#[tokio::test]
async fn deliver_pending_sends_each_recent_key_once() {
    let (_dir, repo) = temp_repo().await;
    let (url, received) = collector(post(echo_ok)).await;
    let client = online_client(&url);
    let now = Utc::now();

    let recent_a = aggregation_key(now - Duration::hours(2));
    let recent_b = aggregation_key(now - Duration::hours(3));
    let stale = aggregation_key(now - Duration::days(40));
    for key in [&recent_a, &recent_b, &stale] {
        repo.save_aggregate(key, &[summary()]).await.unwrap();
    }

    let report = deliver_pending(repo.clone(), client.clone(), now, 30).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(received.len(), 2);
    assert!(repo.get_aggregate(&recent_a).await.unwrap().unwrap().sent);
    assert!(repo.get_aggregate(&recent_b).await.unwrap().unwrap().sent);
    assert!(!repo.get_aggregate(&stale).await.unwrap().unwrap().sent);

    // Nothing left to send on the next sweep.
    let again = deliver_pending(repo.clone(), client, now, 30).await.unwrap();
    assert_eq!(again.delivered, 0);
    assert_eq!(received.len(), 2);
}

#[tokio::test]
async fn deliver_pending_reports_exhausted_keys() {
    let (_dir, repo) = temp_repo().await;
    let (url, _) = collector(post(server_error)).await;
    let client = Arc::new(
        DeliveryClient::new(DeliveryConfig {
            url,
            contract_number: "TEST-123".into(),
            offline: false,
            timeout_secs: 5,
            max_retries: 2,
        })
        .unwrap(),
    );
    let now = Utc::now();
    let key = aggregation_key(now - Duration::hours(2));
    repo.save_aggregate(&key, &[summary()]).await.unwrap();

    let first = deliver_pending(repo.clone(), client.clone(), now, 30).await.unwrap();
    assert_eq!(first.failed, 1);
    deliver_pending(repo.clone(), client.clone(), now, 30).await.unwrap();
    let third = deliver_pending(repo.clone(), client, now, 30).await.unwrap();
    assert_eq!(third.exhausted, 1);
    assert_eq!(repo.count_attempts(&key).await.unwrap(), 2);

    let agg = repo.get_aggregate(&key).await.unwrap().unwrap();
    assert!(!agg.sent);
    assert_eq!(
        agg.last_error.as_deref(),
        Some("Maximum retry attempts (2) reached")
    );
}

#[tokio::test]
async fn deliver_pending_offline_is_noop() {
    let (_dir, repo) = temp_repo().await;
    let now = Utc::now();
    let key = aggregation_key(now - Duration::hours(2));
    repo.save_aggregate(&key, &[summary()]).await.unwrap();
    let client = Arc::new(
        DeliveryClient::new(DeliveryConfig {
            url: String::new(),
            contract_number: String::new(),
            offline: true,
            timeout_secs: 30,
            max_retries: 10,
        })
        .unwrap(),
    );

    let report = deliver_pending(repo.clone(), client, now, 30).await.unwrap();
    assert_eq!(report, Default::default());
    assert_eq!(repo.count_attempts(&key).await.unwrap(), 0);
}

#[tokio::test]
async fn corrupt_aggregate_does_not_block_other_keys() {
    let (dir, repo) = temp_repo().await;
    let (url, received) = collector(post(echo_ok)).await;
    let client = online_client(&url);
    let now = Utc::now();

    let broken = aggregation_key(now - Duration::hours(3));
    let good = aggregation_key(now - Duration::hours(2));
    common::raw_exec(
        &dir,
        &format!(
            "INSERT INTO aggregates (aggregation_key, data) VALUES ('{}', '[{{\"device_id\":\"GPU-1\",\"name\":\"RTX\",\"x_mean\":null}}]')",
            broken
        ),
    )
    .await;
    repo.save_aggregate(&good, &[summary()]).await.unwrap();

    let report = deliver_pending(repo.clone(), client, now, 30).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(received.len(), 1);
    assert!(repo.get_aggregate(&good).await.unwrap().unwrap().sent);
}
