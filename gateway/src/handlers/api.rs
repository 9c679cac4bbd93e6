use axum::Json;
use serde_json::{Value, json};

/// `GET /healthz`
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
