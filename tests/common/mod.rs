// Shared test helpers
#![allow(dead_code)]

use axum::Router;
use chrono::{DateTime, TimeZone, Utc};
use devmon::delivery::{DeliveryClient, DeliveryConfig};
use devmon::metrics_repo::MetricsRepo;
use devmon::models::{DeviceReading, Sample, format_timestamp};
use std::sync::Arc;
use tempfile::TempDir;

pub async fn temp_repo() -> (TempDir, Arc<MetricsRepo>) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("metrics.db");
    let repo = MetricsRepo::connect(path.to_str().unwrap()).await.unwrap();
    repo.init().await.unwrap();
    (dir, Arc::new(repo))
}

/// Runs raw SQL against the repo's database file (for corrupt-row fixtures).
pub async fn raw_exec(dir: &TempDir, sql: &str) {
    let path = dir.path().join("metrics.db");
    let pool = sqlx::SqlitePool::connect(&format!("sqlite:{}", path.display()))
        .await
        .unwrap();
    sqlx::query(sql).execute(&pool).await.unwrap();
    pool.close().await;
}

pub fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

pub fn gpu(device_id: &str, name: &str, memory_used_mb: f64, utilization: f64) -> DeviceReading {
    DeviceReading::new(device_id, name)
        .with("memory_used_mb", memory_used_mb)
        .with("sm_utilization_percent", utilization)
        .with("pci_bus_id", "00000000:01:00.0")
}

pub fn sample(ts: DateTime<Utc>, devices: Vec<DeviceReading>) -> Sample {
    Sample {
        captured_at: format_timestamp(ts),
        devices,
    }
}

/// Serves `router` on an ephemeral local port; returns the ingest URL.
pub async fn spawn_collector(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}/ingest", addr)
}

pub fn online_client(url: &str) -> Arc<DeliveryClient> {
    Arc::new(
        DeliveryClient::new(DeliveryConfig {
            url: url.to_string(),
            contract_number: "TEST-123".into(),
            offline: false,
            timeout_secs: 5,
            max_retries: 10,
        })
        .unwrap(),
    )
}
