//! Provider configuration management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::core::provider::ProviderConfig;
use crate::core::registry::ProviderSummary;
use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ProviderConfigBody {
    pub id: String,
    #[serde(flatten)]
    pub config: ProviderConfig,
}

/// `GET /providers/configs`
///
/// Lists registered providers with their API keys masked.
pub async fn list_provider_configs(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<ProviderSummary>> {
    Json(state.registry.list())
}

/// `POST /providers/config`
pub async fn create_provider_config(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProviderConfigBody>,
) -> AppResult<(StatusCode, Json<Value>)> {
    if body.config.api_key.trim().is_empty() {
        return Err(AppError::BadRequest("api_key must not be empty".to_string()));
    }

    let provider = body.config.provider;
    state.registry.register(&body.id, body.config)?;
    info!(provider_id = %body.id, provider = %provider, "Provider config created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": body.id, "provider": provider })),
    ))
}

/// `DELETE /providers/config/{id}`
///
/// In-flight attempts keep the adapter they already resolved.
pub async fn delete_provider_config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.registry.remove(&id)?;
    info!(provider_id = %id, "Provider config deleted");
    Ok(StatusCode::NO_CONTENT)
}
