use std::collections::HashSet;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use dashboard_core::auth::CallerIdentity;
use serde::Deserialize;

use crate::error::AppError;
use crate::identity::VerifyError;
use crate::state::AppState;

/// Caller whose Firebase ID token has been verified.
///
/// The token is read from `Authorization: Bearer <token>`, falling back to a
/// `token` query parameter for dashboard clients that send it that way.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub CallerIdentity);

/// Verified caller that also passed the [`AdminPolicy`].
#[derive(Debug, Clone)]
pub struct AdminUser(pub CallerIdentity);

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Who may call admin-only routes.
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    admin_uids: HashSet<String>,
}

impl AdminPolicy {
    pub fn new(admin_uids: HashSet<String>) -> Self {
        Self { admin_uids }
    }

    /// No uid allow-list configured: every verified caller is admitted.
    pub fn is_open(&self) -> bool {
        self.admin_uids.is_empty()
    }

    fn admits(&self, caller: &CallerIdentity) -> bool {
        caller.admin_claim || self.is_open() || self.admin_uids.contains(&caller.uid)
    }
}

pub fn require_admin(
    caller: &CallerIdentity,
    policy: &AdminPolicy,
    operation: &str,
) -> Result<(), AppError> {
    if policy.admits(caller) {
        tracing::info!(
            uid = %caller.uid,
            operation = operation,
            admin_claim = caller.admin_claim,
            open_policy = policy.is_open(),
            decision = "allow",
            "admin authorization decision"
        );
        return Ok(());
    }

    tracing::warn!(
        uid = %caller.uid,
        operation = operation,
        admin_claim = caller.admin_claim,
        decision = "deny",
        "admin authorization decision"
    );
    Err(AppError::Forbidden {
        message: format!("Admin rights required for operation '{operation}'"),
        docs_hint: Some(
            "Grant the user the `admin: true` custom claim or add the uid to DASHBOARD_ADMIN_UIDS."
                .to_string(),
        ),
    })
}

/// Bearer token from the Authorization header, else the `token` query parameter.
fn presented_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = from_header {
        return Some(token.to_owned());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = presented_token(parts).ok_or_else(|| AppError::Forbidden {
            message: "Missing ID token".to_string(),
            docs_hint: Some(
                "Include 'Authorization: Bearer <Firebase ID token>' or a 'token' query parameter."
                    .to_string(),
            ),
        })?;

        match state.verifier.verify(&token).await {
            Ok(identity) => Ok(AuthenticatedUser(identity)),
            Err(VerifyError::Rejected(message)) => {
                tracing::warn!(reason = %message, path = %parts.uri.path(), "ID token rejected");
                Err(AppError::Forbidden {
                    message,
                    docs_hint: Some("Sign in again to obtain a fresh ID token.".to_string()),
                })
            }
            Err(VerifyError::Unavailable(detail)) => Err(AppError::Upstream {
                service: "identity provider",
                detail,
            }),
        }
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(caller) = AuthenticatedUser::from_request_parts(parts, state).await?;
        let operation = format!("{} {}", parts.method, parts.uri.path());
        require_admin(&caller, &state.admin_policy, &operation)?;
        Ok(AdminUser(caller))
    }
}
