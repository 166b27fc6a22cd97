use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use dashboard_core::chat::StatContext;
use serde::{Deserialize, Serialize};

use crate::chat_relay::ChatError;
use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/chat", post(chat))
}

#[derive(Deserialize, utoipa::ToSchema)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    /// Stat card values to merge into the session, e.g. `{"totalUsers": 5}`
    #[serde(default)]
    #[schema(value_type = Object)]
    pub stat_card_info: StatContext,
    /// Token returned by a previous call; omit to start a new session
    #[serde(default)]
    pub session_token: Option<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ChatResponse {
    pub reply: String,
    pub session_token: String,
}

/// POST /chat: ask the assistant about the dashboard stats
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Assistant reply", body = ChatResponse),
        (status = 400, description = "Invalid body", body = dashboard_core::error::ApiError),
        (status = 429, description = "Rate limited", body = dashboard_core::error::ApiError),
        (status = 500, description = "Model unavailable", body = dashboard_core::error::ApiError),
    ),
    tag = "chat"
)]
pub async fn chat(
    State(state): State<AppState>,
    AppJson(req): AppJson<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let reply = state
        .chat
        .reply(&req.message, &req.stat_card_info, req.session_token.as_deref())
        .await
        .map_err(|err| match err {
            ChatError::Model(e) => AppError::Upstream {
                service: "chat model",
                detail: e.to_string(),
            },
            ChatError::Store(e) => AppError::from(e),
        })?;

    Ok(Json(ChatResponse {
        reply: reply.reply,
        session_token: reply.session_token,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::test_support::{TestApp, call};

    #[tokio::test]
    async fn empty_message_returns_greeting_with_stats() {
        let app = TestApp::new();
        let (status, body) = call(
            &app,
            "POST",
            "/chat",
            None,
            Some(json!({"message": "", "stat_card_info": {"totalUsers": 5}})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let reply = body["reply"].as_str().unwrap();
        assert!(reply.starts_with("Hello! I am your virtual assistant."));
        assert!(reply.contains("- Total Users: 5"));
        assert!(body["session_token"].as_str().unwrap().starts_with("dash_ss_"));
    }

    #[tokio::test]
    async fn session_token_carries_stats_into_the_prompt() {
        let app = TestApp::new();
        let (_, first) = call(
            &app,
            "POST",
            "/chat",
            None,
            Some(json!({"message": "", "stat_card_info": {"apiRequests": 120}})),
        )
        .await;

        let (status, second) = call(
            &app,
            "POST",
            "/chat",
            None,
            Some(json!({
                "message": "Is traffic normal?",
                "session_token": first["session_token"],
            })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["session_token"], first["session_token"]);
        assert_eq!(second["reply"], "All good.");
        let prompts = app.model.prompts();
        assert!(prompts[0].contains("- API Requests: 120"));
    }

    #[tokio::test]
    async fn model_failure_is_a_sanitized_500() {
        let app = TestApp::with_failing_model();
        let (status, body) = call(&app, "POST", "/chat", None, Some(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "upstream_error");
        assert!(!body.to_string().contains("API key"));
    }
}
