use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use dashboard_core::users::UserSummary;

use crate::auth::AdminUser;
use crate::directory::list_all_users;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/users", get(list_users))
}

/// GET /users: every user in the Firebase project
#[utoipa::path(
    get,
    path = "/users",
    params(("token" = Option<String>, Query, description = "ID token, when not sent as a bearer header")),
    responses(
        (status = 200, description = "All users, timestamps in the display time zone", body = Vec<UserSummary>),
        (status = 403, description = "Invalid token or not an admin", body = dashboard_core::error::ApiError),
        (status = 500, description = "User directory unavailable", body = dashboard_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn list_users(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserSummary>>, AppError> {
    let users = list_all_users(state.directory.as_ref(), state.display_tz)
        .await
        .map_err(|e| AppError::Upstream {
            service: "user directory",
            detail: e.to_string(),
        })?;
    tracing::info!(uid = %admin.uid, count = users.len(), "listed users");
    Ok(Json(users))
}
