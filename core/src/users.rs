use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use utoipa::ToSchema;

/// Rendered in place of a missing timestamp.
pub const MISSING_TIMESTAMP: &str = "N/A";

/// Display format for user timestamps, e.g. `03/02/2024, 09:15:00 PM`.
const DISPLAY_FORMAT: &str = "%d/%m/%Y, %I:%M:%S %p";

/// A user record as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub uid: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub disabled: bool,
    /// Milliseconds since the Unix epoch
    pub created_at_ms: Option<i64>,
    /// Milliseconds since the Unix epoch
    pub last_sign_in_ms: Option<i64>,
}

/// Dashboard row for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct UserSummary {
    pub uid: String,
    pub email: Option<String>,
    /// Formatted date-time, or "N/A"
    pub creation_time: String,
    /// Formatted date-time, or "N/A"
    pub last_sign_in_time: String,
    pub email_verified: bool,
    pub disabled: bool,
}

impl UserSummary {
    pub fn from_directory(user: DirectoryUser, tz: Tz) -> Self {
        Self {
            creation_time: format_timestamp(user.created_at_ms, tz),
            last_sign_in_time: format_timestamp(user.last_sign_in_ms, tz),
            uid: user.uid,
            email: user.email,
            email_verified: user.email_verified,
            disabled: user.disabled,
        }
    }
}

/// Format an epoch-milliseconds timestamp in `tz`. Missing, zero and
/// out-of-range values all render as "N/A".
pub fn format_timestamp(millis: Option<i64>, tz: Tz) -> String {
    millis
        .filter(|ms| *ms != 0)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|at| at.with_timezone(&tz).format(DISPLAY_FORMAT).to_string())
        .unwrap_or_else(|| MISSING_TIMESTAMP.to_string())
}
