use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

/// Prometheus text-format scrape endpoint.
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
