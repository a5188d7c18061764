use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Poll error: {0}")]
    Poll(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Gave up reconnecting after {0} attempts")]
    ExhaustedRetries(u32),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Http(_) | AppError::Poll(_) | AppError::Transport(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Json(_) | AppError::Decode(_) => StatusCode::BAD_REQUEST,
            AppError::ExhaustedRetries(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_) | AppError::Yaml(_) | AppError::Io(_) | AppError::Internal(_) => {
                tracing::error!("Internal error: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}

/// Reasons an inbound frame is rejected. Always logged and dropped, never
/// propagated past the router.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    Malformed(String),

    #[error("frame has no `type` discriminant")]
    MissingType,

    #[error("unknown frame type `{0}`")]
    UnknownType(String),

    #[error("invalid `{kind}` payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },
}

impl DecodeError {
    pub(crate) fn invalid(kind: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::InvalidPayload {
            kind,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
