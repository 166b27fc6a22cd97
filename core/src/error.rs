use serde::Serialize;
use utoipa::ToSchema;

/// Structured error response returned by every endpoint.
/// Carries enough context for the dashboard to show what went wrong
/// and which input to fix.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "validation_failed", "forbidden")
    pub error: String,
    /// Human-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the API
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const FORBIDDEN: &str = "forbidden";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const RATE_LIMITED: &str = "rate_limited";
}
