use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dashboard_core::alerts::AlertError;
use dashboard_core::error::{self, ApiError};
use dashboard_core::store::StoreError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing/invalid identity token or insufficient rights (403)
    Forbidden {
        message: String,
        docs_hint: Option<String>,
    },
    /// An external provider failed (500). `detail` is logged, never returned.
    Upstream {
        service: &'static str,
        detail: String,
    },
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Forbidden { message, docs_hint } => (
                StatusCode::FORBIDDEN,
                ApiError {
                    error: error::codes::FORBIDDEN.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Upstream { service, detail } => {
                tracing::error!(service, detail = %detail, request_id = %request_id, "Upstream error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::UPSTREAM_ERROR.to_string(),
                        message: format!("The {service} service is currently unavailable"),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: Some("Retry the request later.".to_string()),
                    },
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = %request_id, "Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "An internal error occurred".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: None,
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<AlertError> for AppError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::Forbidden { message } => AppError::Forbidden {
                message,
                docs_hint: Some("The rule's user_id must match the uid of the signed-in user.".to_string()),
            },
            AlertError::Validation {
                field,
                message,
                received,
            } => AppError::Validation {
                message,
                field: Some(field.to_string()),
                received: received.map(serde_json::Value::String),
                docs_hint: Some(
                    "Conditions look like {\"field\": \"temperature\", \"operator\": \">\", \"value\": \"30\"}."
                        .to_string(),
                ),
            },
            AlertError::Store(err) => AppError::from(err),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}
