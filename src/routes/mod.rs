// Read-only HTTP reporting routes

mod http;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::metrics_repo::MetricsRepo;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) metrics_repo: Arc<MetricsRepo>,
}

pub fn app(metrics_repo: Arc<MetricsRepo>) -> Router {
    let state = AppState { metrics_repo };
    Router::new()
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/sends", get(http::list_sends_handler)) // GET /api/sends
        .route("/api/sends/{key}", get(http::search_send_handler)) // GET /api/sends/{key}
        .route("/api/samples", get(http::samples_handler)) // GET /api/samples?at=
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
