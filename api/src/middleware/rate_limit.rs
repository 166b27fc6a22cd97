use axum::body::Body;
use axum::http::{HeaderValue, Response, StatusCode, header};
use axum::response::IntoResponse;
use tower_governor::{
    GovernorError, GovernorLayer, governor::GovernorConfigBuilder,
    key_extractor::SmartIpKeyExtractor,
};

type RateLimitLayer = GovernorLayer<SmartIpKeyExtractor, governor::middleware::NoOpMiddleware, Body>;

/// Rate limit for POST /chat: 30 requests per minute per IP, bursts of 10.
/// Every message may cost a model call.
pub fn chat_layer() -> RateLimitLayer {
    GovernorLayer::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(10)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("invalid governor config for chat"),
    )
    .error_handler(json_error_handler)
}

/// Rejections rendered as `ApiError` JSON, with Retry-After when known.
fn json_error_handler(err: GovernorError) -> Response<Body> {
    let (status, retry_after, message) = match err {
        GovernorError::TooManyRequests { wait_time, .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Some(wait_time),
            format!("Too many chat messages. Retry after {wait_time} seconds."),
        ),
        GovernorError::UnableToExtractKey => (
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            "Unable to determine client identity for rate limiting".to_string(),
        ),
        GovernorError::Other { code, msg, .. } => (code, None, msg.unwrap_or_default()),
    };

    let body = serde_json::json!({
        "error": dashboard_core::error::codes::RATE_LIMITED,
        "message": message,
        "request_id": uuid::Uuid::now_v7().to_string(),
    });

    let mut response = (status, axum::Json(body)).into_response();
    if let Some(wait_time) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(wait_time));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn too_many_requests_sets_retry_after() {
        let response = json_error_handler(GovernorError::TooManyRequests {
            wait_time: 7,
            headers: None,
        });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "7");
    }

    #[test]
    fn missing_client_ip_is_an_internal_error() {
        let response = json_error_handler(GovernorError::UnableToExtractKey);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }
}
