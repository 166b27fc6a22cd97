//! Extractors that turn axum rejections into structured `AppError` responses.
//!
//! Handlers take `AppJson<T>` instead of `axum::Json<T>` so a malformed body
//! yields a 400 `ApiError` rather than axum's plain-text 422.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use crate::error::AppError;

pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => Err(map_json_rejection(rejection)),
        }
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    let body_text = rejection.body_text();
    let field = field_from_serde_message(&body_text).unwrap_or_else(|| "body".to_string());

    AppError::Validation {
        message: format!("Invalid request body: {body_text}"),
        field: Some(field),
        received: None,
        docs_hint: Some(
            "Check the request body against the endpoint's schema (GET /api-doc/openapi.json)."
                .to_string(),
        ),
    }
}

/// Dotted path of the offending field.
///
/// axum reports data errors as `<prefix>: <path>: <serde message>`, where the
/// path is omitted at the top level. A `missing field` message names one more
/// segment below the path.
fn field_from_serde_message(msg: &str) -> Option<String> {
    let detail = msg
        .split_once("target type: ")
        .map(|(_, rest)| rest)
        .unwrap_or(msg);

    let (path, serde_msg) = match detail.split_once(": ") {
        Some((path, rest)) if !path.is_empty() && !path.contains(' ') => (Some(path), rest),
        _ => (None, detail),
    };

    let named = ["missing field `", "unknown field `"]
        .iter()
        .find_map(|pattern| {
            let after = &serde_msg[serde_msg.find(pattern)? + pattern.len()..];
            after.find('`').map(|end| after[..end].to_string())
        });

    match (path, named) {
        (Some(path), Some(name)) if serde_msg.contains("missing field `") => {
            Some(format!("{path}.{name}"))
        }
        (Some(path), _) => Some(path.to_string()),
        (None, named) => named,
    }
}
