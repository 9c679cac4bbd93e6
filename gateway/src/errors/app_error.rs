use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::core::fallback::FallbackError;
use crate::core::registry::RegistryError;

/// Errors returned by HTTP handlers
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Fallback(#[from] FallbackError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Fallback(FallbackError::Validation(_)) => StatusCode::BAD_REQUEST,
            AppError::Fallback(err @ FallbackError::AllAttemptsFailed { .. }) => {
                if err.is_all_unsupported() {
                    StatusCode::NOT_IMPLEMENTED
                } else {
                    StatusCode::BAD_GATEWAY
                }
            }
            AppError::Fallback(FallbackError::DeadlineExceeded { .. }) => {
                StatusCode::GATEWAY_TIMEOUT
            }
            AppError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Registry(RegistryError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::Registry(RegistryError::InvalidId(_)) => StatusCode::BAD_REQUEST,
            AppError::Registry(RegistryError::Construction { .. }) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = match &self {
            AppError::Fallback(err) if !err.failures().is_empty() => json!({
                "error": self.to_string(),
                "failures": err.failures(),
            }),
            _ => json!({ "error": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
