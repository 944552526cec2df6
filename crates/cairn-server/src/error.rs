use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use cairn_core::error::CairnError;

/// API error that maps to an HTTP status and the structured error body
/// `{"error":{"code":…,"message":…,"params":…}}`.
#[derive(Debug)]
pub enum ApiError {
    /// 400 with optional per-parameter detail.
    InvalidParams {
        message: String,
        params: Option<serde_json::Value>,
    },
    /// 404.
    NotFound(String),
    /// 500.
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::InvalidParams {
            message: message.into(),
            params: None,
        }
    }

    /// The canonical invalid-parameter shape: a top-level `invalid_params`
    /// error carrying per-field codes.
    pub fn invalid_param(field: &str, message: impl Into<String>) -> Self {
        ApiError::InvalidParams {
            message: "Invalid parameter".into(),
            params: Some(json!({
                field: {
                    "code": "invalid_argument",
                    "message": message.into(),
                }
            })),
        }
    }
}

impl From<CairnError> for ApiError {
    fn from(e: CairnError) -> Self {
        match e {
            CairnError::InvalidParams(msg) => ApiError::bad_request(msg),
            CairnError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, params) = match self {
            ApiError::InvalidParams { message, params } => {
                (StatusCode::BAD_REQUEST, "invalid_params", message, params)
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, "not_found", message, None)
            }
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                message,
                None,
            ),
        };
        tracing::error!(status = %status, code, error = %message);

        let mut error = json!({
            "code": code,
            "message": message,
        });
        if let Some(params) = params {
            error["params"] = params;
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}
