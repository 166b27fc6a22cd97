use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use dashboard_core::alerts::{AlertRule, EvaluationReport, NewAlertRule, Observations};
use serde::Deserialize;

use crate::auth::{AdminUser, AuthenticatedUser};
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/add-alert", post(add_alert))
        .route("/get-alerts", get(get_alerts))
        .route("/evaluate-alerts", post(evaluate_alerts))
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct EvaluateRequest {
    /// Current value per observed field, e.g. `{"temperature": 32}`
    #[schema(value_type = Object)]
    pub observations: Observations,
}

/// POST /add-alert: store a threshold rule owned by the caller
#[utoipa::path(
    post,
    path = "/add-alert",
    request_body = NewAlertRule,
    responses(
        (status = 200, description = "Rule stored", body = AlertRule),
        (status = 400, description = "Invalid body or condition", body = dashboard_core::error::ApiError),
        (status = 403, description = "Invalid token or rule owned by someone else", body = dashboard_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "alerts"
)]
pub async fn add_alert(
    AuthenticatedUser(caller): AuthenticatedUser,
    State(state): State<AppState>,
    AppJson(draft): AppJson<NewAlertRule>,
) -> Result<Json<AlertRule>, AppError> {
    let rule = state.alerts.add_rule(draft, &caller).await?;
    Ok(Json(rule))
}

/// GET /get-alerts: the caller's rules in creation order
#[utoipa::path(
    get,
    path = "/get-alerts",
    responses(
        (status = 200, description = "Caller's rules", body = Vec<AlertRule>),
        (status = 403, description = "Invalid token", body = dashboard_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "alerts"
)]
pub async fn get_alerts(
    AuthenticatedUser(caller): AuthenticatedUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<AlertRule>>, AppError> {
    let rules = state.alerts.list_rules(&caller).await?;
    Ok(Json(rules))
}

/// POST /evaluate-alerts: run one evaluation pass over every stored rule
#[utoipa::path(
    post,
    path = "/evaluate-alerts",
    request_body = EvaluateRequest,
    responses(
        (status = 200, description = "Rules that fired, plus rules that could not be evaluated", body = EvaluationReport),
        (status = 400, description = "Invalid body", body = dashboard_core::error::ApiError),
        (status = 403, description = "Invalid token or not an admin", body = dashboard_core::error::ApiError),
    ),
    security(("bearer_auth" = [])),
    tag = "alerts"
)]
pub async fn evaluate_alerts(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    AppJson(req): AppJson<EvaluateRequest>,
) -> Result<Json<EvaluationReport>, AppError> {
    let report = state.alerts.evaluate(&req.observations).await?;
    tracing::info!(
        uid = %admin.uid,
        triggered = report.triggered_alerts.len(),
        failures = report.failures.len(),
        "manual alert evaluation"
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{TestApp, call};

    fn rule_body(user_id: &str, value: serde_json::Value, frequency: &str) -> serde_json::Value {
        json!({
            "user_id": user_id,
            "condition": {"field": "temperature", "operator": ">", "value": value},
            "frequency": frequency,
            "notification_message": "Too hot"
        })
    }

    #[tokio::test]
    async fn add_then_list_returns_only_own_rules() {
        let app = TestApp::new();
        let (status, stored) = call(
            &app,
            "POST",
            "/add-alert",
            Some("alice-token"),
            Some(rule_body("alice", json!("30"), "recurring")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stored["user_id"], "alice");
        assert_eq!(stored["condition"]["value"], "30");
        assert!(stored["next_alert_time"].is_string());

        call(&app, "POST", "/add-alert", Some("bob-token"), Some(rule_body("bob", json!(10), "once"))).await;

        let (status, listed) = call(&app, "GET", "/get-alerts", Some("alice-token"), None).await;
        assert_eq!(status, StatusCode::OK);
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["id"], stored["id"]);
    }

    #[tokio::test]
    async fn adding_a_rule_for_someone_else_is_forbidden() {
        let app = TestApp::new();
        let (status, body) = call(
            &app,
            "POST",
            "/add-alert",
            Some("alice-token"),
            Some(rule_body("bob", json!("30"), "once")),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (_, listed) = call(&app, "GET", "/get-alerts", Some("bob-token"), None).await;
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn unsupported_operator_is_a_validation_error() {
        let app = TestApp::new();
        let mut body = rule_body("alice", json!("30"), "once");
        body["condition"]["operator"] = json!("<");

        let (status, body) = call(&app, "POST", "/add-alert", Some("alice-token"), Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "condition.operator");
    }

    #[tokio::test]
    async fn malformed_body_is_a_validation_error() {
        let app = TestApp::new();
        let (status, body) = call(
            &app,
            "POST",
            "/add-alert",
            Some("alice-token"),
            Some(json!({"user_id": "alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_failed");
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_forbidden() {
        let app = TestApp::new();
        let (status, _) = call(&app, "GET", "/get-alerts", None, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, "GET", "/get-alerts", Some("forged"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Invalid ID token: signature mismatch");
    }

    #[tokio::test]
    async fn identity_provider_outage_is_a_sanitized_500() {
        let app = TestApp::new();
        let (status, body) = call(&app, "GET", "/get-alerts", Some("outage-token"), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "upstream_error");
        assert!(!body.to_string().contains("JWKS"));
    }

    #[tokio::test]
    async fn evaluation_fires_matching_rules_once() {
        let app = TestApp::new();
        call(&app, "POST", "/add-alert", Some("alice-token"), Some(rule_body("alice", json!("30"), "once"))).await;
        call(&app, "POST", "/add-alert", Some("bob-token"), Some(rule_body("bob", json!("40"), "recurring"))).await;

        let observations = json!({"observations": {"temperature": 32}});
        let (status, report) = call(
            &app,
            "POST",
            "/evaluate-alerts",
            Some("alice-token"),
            Some(observations.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let fired = report["triggered_alerts"].as_array().unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0]["user_id"], "alice");
        assert_eq!(fired[0]["alert_message"], "Too hot");
        assert!(report.get("failures").is_none());

        let (_, again) = call(&app, "POST", "/evaluate-alerts", Some("alice-token"), Some(observations)).await;
        assert_eq!(again["triggered_alerts"], json!([]));

        let (_, listed) = call(&app, "GET", "/get-alerts", Some("alice-token"), None).await;
        assert!(listed[0]["next_alert_time"].is_null());
    }

    #[tokio::test]
    async fn evaluation_requires_admin_when_allow_list_is_set() {
        let app = TestApp::with_admins(&["alice"]);
        let body = json!({"observations": {"temperature": 32}});

        let (status, _) = call(&app, "POST", "/evaluate-alerts", Some("bob-token"), Some(body.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, "POST", "/evaluate-alerts", Some("alice-token"), Some(body)).await;
        assert_eq!(status, StatusCode::OK);
    }
}
