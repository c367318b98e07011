use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// The single error taxonomy for the gateway core. Every fallible path,
/// wherever it originates, resolves to one of these before it reaches the
/// HTTP boundary — there is exactly one place that maps kind to status.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing model in request body")]
    MissingModel,

    #[error("model mapping not found: {0}")]
    ModelNotFound(String),

    #[error("model mapping disabled: {0}")]
    ModelDisabled(String),

    #[error("no available provider for model: {0}")]
    NoAvailableProvider(String),

    #[error("unsupported protocol conversion: {0}")]
    UnsupportedProtocolConversion(String),

    #[error("upstream error: {status} {body}")]
    UpstreamError { status: u16, body: String },

    #[error("upstream rejected: {status} {body}")]
    UpstreamRejected { status: u16, body: String },

    #[error("invalid or missing api key")]
    InvalidApiKey,

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match &self {
            AppError::MissingModel => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "missing_model",
                self.to_string(),
            ),
            AppError::ModelNotFound(_) => (
                StatusCode::NOT_FOUND,
                "invalid_request_error",
                "model_not_found",
                self.to_string(),
            ),
            AppError::ModelDisabled(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_error",
                "model_disabled",
                self.to_string(),
            ),
            AppError::NoAvailableProvider(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_error",
                "no_available_provider",
                self.to_string(),
            ),
            AppError::UnsupportedProtocolConversion(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "unsupported_protocol_conversion",
                self.to_string(),
            ),
            AppError::UpstreamError { status, body } => (
                StatusCode::BAD_GATEWAY,
                "upstream_error",
                "upstream_error",
                format!("all providers exhausted; last upstream status {status}: {body}"),
            ),
            AppError::UpstreamRejected { status, body } => {
                let code = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                return (
                    code,
                    Json(json!({"error": {"message": body, "type": "upstream_rejected", "code": "upstream_rejected"}})),
                )
                    .into_response();
            }
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::MalformedBody(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "malformed_body",
                self.to_string(),
            ),
            AppError::Database(e) => {
                tracing::error!("database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
