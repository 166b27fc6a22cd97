//! Fakes for the external collaborators and a router harness for handler tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono_tz::Tz;
use dashboard_core::alert_service::AlertService;
use dashboard_core::auth::CallerIdentity;
use dashboard_core::chat::InMemorySessionStore;
use dashboard_core::store::InMemoryRuleStore;
use dashboard_core::users::DirectoryUser;
use tower::ServiceExt;

use crate::app::{RouterOptions, build_router};
use crate::auth::AdminPolicy;
use crate::chat_relay::ChatRelay;
use crate::directory::{DirectoryError, UserDirectory, UserPage};
use crate::identity::{IdentityVerifier, VerifyError};
use crate::llm::{ChatModel, LlmError};
use crate::state::AppState;

/// Accepts `alice-token` and `bob-token`; `outage-token` simulates a key fetch failure.
pub struct StaticVerifier;

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<CallerIdentity, VerifyError> {
        match token {
            "alice-token" => Ok(CallerIdentity::new("alice")),
            "bob-token" => Ok(CallerIdentity::new("bob")),
            "outage-token" => Err(VerifyError::Unavailable("JWKS endpoint returned 503".to_string())),
            _ => Err(VerifyError::Rejected(
                "Invalid ID token: signature mismatch".to_string(),
            )),
        }
    }
}

pub fn directory_user(uid: &str, last_sign_in_ms: Option<i64>) -> DirectoryUser {
    DirectoryUser {
        uid: uid.to_string(),
        email: Some(format!("{uid}@example.com")),
        email_verified: true,
        disabled: false,
        created_at_ms: Some(1_706_994_900_000),
        last_sign_in_ms,
    }
}

/// Serves fixed pages in order, linked by `page-<n>` tokens.
pub struct PagedDirectory {
    pages: Vec<Vec<DirectoryUser>>,
    calls: AtomicUsize,
}

impl PagedDirectory {
    pub fn new(pages: Vec<Vec<DirectoryUser>>) -> Self {
        Self {
            pages,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for PagedDirectory {
    async fn list_page(&self, page_token: Option<&str>) -> Result<UserPage, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let index = page_token
            .and_then(|t| t.strip_prefix("page-"))
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        let next = index + 1;
        Ok(UserPage {
            users: self.pages.get(index).cloned().unwrap_or_default(),
            next_page_token: (next < self.pages.len()).then(|| format!("page-{next}")),
        })
    }
}

pub struct FailingDirectory;

#[async_trait]
impl UserDirectory for FailingDirectory {
    async fn list_page(&self, _page_token: Option<&str>) -> Result<UserPage, DirectoryError> {
        Err(DirectoryError::Status {
            status: reqwest::StatusCode::TOO_MANY_REQUESTS,
            body: "quota exceeded for project dash-prod".to_string(),
        })
    }
}

/// Returns a canned reply (or a canned failure) and records every prompt.
pub struct ScriptedModel {
    reply: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().ok_or_else(|| LlmError::Status {
            status: reqwest::StatusCode::BAD_REQUEST,
            body: "API key not valid. Please pass a valid API key.".to_string(),
        })
    }
}

/// Application wired with in-memory stores and the fakes above. Rule and
/// session state is shared across requests made through one `TestApp`.
pub struct TestApp {
    pub model: Arc<ScriptedModel>,
    alerts: AlertService,
    chat: Arc<ChatRelay>,
    directory: Arc<dyn UserDirectory>,
    admin_uids: HashSet<String>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(ScriptedModel::replying("**All** good."), HashSet::new())
    }

    pub fn with_admins(uids: &[&str]) -> Self {
        let uids = uids.iter().map(|uid| uid.to_string()).collect();
        Self::build(ScriptedModel::replying("**All** good."), uids)
    }

    pub fn with_failing_model() -> Self {
        Self::build(ScriptedModel::failing(), HashSet::new())
    }

    pub fn with_users(mut self, pages: Vec<Vec<DirectoryUser>>) -> Self {
        self.directory = Arc::new(PagedDirectory::new(pages));
        self
    }

    pub fn with_failing_directory(mut self) -> Self {
        self.directory = Arc::new(FailingDirectory);
        self
    }

    fn build(model: ScriptedModel, admin_uids: HashSet<String>) -> Self {
        let model = Arc::new(model);
        Self {
            chat: Arc::new(ChatRelay::new(
                Arc::new(InMemorySessionStore::new()),
                model.clone(),
            )),
            model,
            alerts: AlertService::new(Arc::new(InMemoryRuleStore::new())),
            directory: Arc::new(PagedDirectory::new(Vec::new())),
            admin_uids,
        }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            alerts: self.alerts.clone(),
            verifier: Arc::new(StaticVerifier),
            directory: self.directory.clone(),
            chat: self.chat.clone(),
            admin_policy: Arc::new(AdminPolicy::new(self.admin_uids.clone())),
            display_tz: Tz::UTC,
        };
        build_router(state, &RouterOptions::default())
    }
}

/// Send one request and return status plus JSON body (`Null` when empty).
pub async fn call(
    app: &TestApp,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        request = request.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.router().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
