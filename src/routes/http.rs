// GET handlers: version, delivery summaries, raw samples

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;

use super::AppState;
use crate::models::{AGGREGATION_KEY_FORMAT, parse_aggregation_key};
use crate::report::collection_prefix;

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/sends: one summary per aggregation key, newest first.
pub(super) async fn list_sends_handler(State(state): State<AppState>) -> Response {
    match state.metrics_repo.get_delivery_summaries().await {
        Ok(summaries) => Json(summaries).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/sends/{key}: key in stored form or "YYYY-MM-DD HH:00".
pub(super) async fn search_send_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Response {
    let Some(hour) = parse_aggregation_key(&key) else {
        return (StatusCode::BAD_REQUEST, format!("invalid aggregation key: {}", key))
            .into_response();
    };
    let key = hour.format(AGGREGATION_KEY_FORMAT).to_string();
    match state.metrics_repo.get_delivery_summary(&key).await {
        Ok(Some(summary)) => Json(summary).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct SamplesQuery {
    at: Option<String>,
}

/// GET /api/samples?at=<prefix>: raw samples; current hour when `at` is absent.
pub(super) async fn samples_handler(
    State(state): State<AppState>,
    Query(q): Query<SamplesQuery>,
) -> Response {
    let prefix = collection_prefix(q.at.as_deref(), Utc::now());
    match state.metrics_repo.get_samples_matching(&prefix).await {
        Ok(samples) => Json(samples).into_response(),
        Err(e) => internal_error(e),
    }
}

fn internal_error(e: anyhow::Error) -> Response {
    tracing::warn!(error = %e, "reporting query failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}
