use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut body = serde_json::to_value(state.hub.snapshot()).unwrap_or_default();
    body["status"] = "ok".into();
    Json(body)
}
