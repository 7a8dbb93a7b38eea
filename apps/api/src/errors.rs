use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::generation::GenerationError;
use crate::identity::WechatError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("WeChat login failed: {0}")]
    WechatLogin(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::InvalidInput(msg) => AppError::Validation(msg),
            GenerationError::ProviderTransport(e) => AppError::Upstream(e.to_string()),
            // The excerpt was already logged by the validator and stays server-side.
            GenerationError::MalformedResponse { reason, .. } => AppError::MalformedResponse(reason),
        }
    }
}

impl From<WechatError> for AppError {
    fn from(err: WechatError) -> Self {
        match err {
            WechatError::Rejected { errcode, errmsg } => {
                AppError::WechatLogin(format!("{errmsg} (errcode {errcode})"))
            }
            WechatError::NotConfigured => {
                AppError::Config("WeChat credentials not configured".to_string())
            }
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Upstream(msg) => {
                tracing::error!("Upstream error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_ERROR",
                    "The upstream service failed to respond".to_string(),
                )
            }
            AppError::MalformedResponse(reason) => {
                tracing::error!("Malformed upstream response: {reason}");
                (
                    StatusCode::BAD_GATEWAY,
                    "MALFORMED_RESPONSE",
                    "Failed to parse AI response".to_string(),
                )
            }
            AppError::WechatLogin(msg) => (
                StatusCode::BAD_REQUEST,
                "WECHAT_LOGIN_FAILED",
                format!("WeChat login failed: {msg}"),
            ),
            AppError::Config(msg) => {
                tracing::error!("Configuration error: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
