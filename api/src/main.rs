use std::net::SocketAddr;
use std::sync::Arc;

use dashboard_core::alert_service::AlertService;
use dashboard_core::chat::InMemorySessionStore;
use dashboard_core::store::InMemoryRuleStore;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

mod app;
mod auth;
mod chat_relay;
mod config;
mod directory;
mod error;
mod extract;
mod google_auth;
mod identity;
mod llm;
mod middleware;
mod routes;
mod scheduler;
mod state;
#[cfg(test)]
mod test_support;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Admin Dashboard API",
        version = "0.1.0",
        description = "User listing, threshold alert rules and a stats-aware chat assistant for the admin dashboard."
    ),
    paths(
        routes::health::root,
        routes::health::health_check,
        routes::alerts::add_alert,
        routes::alerts::get_alerts,
        routes::alerts::evaluate_alerts,
        routes::users::list_users,
        routes::chat::chat,
    ),
    components(schemas(
        dashboard_core::error::ApiError,
        dashboard_core::alerts::AlertRule,
        dashboard_core::alerts::NewAlertRule,
        dashboard_core::alerts::ConditionSpec,
        dashboard_core::alerts::Frequency,
        dashboard_core::alerts::TriggeredAlert,
        dashboard_core::alerts::RuleFailure,
        dashboard_core::alerts::EvaluationReport,
        dashboard_core::users::UserSummary,
        routes::health::RootResponse,
        routes::alerts::EvaluateRequest,
        routes::chat::ChatRequest,
        routes::chat::ChatResponse,
        HealthResponse,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "system", description = "Liveness and health"),
        (name = "alerts", description = "Threshold alert rules"),
        (name = "users", description = "Firebase user listing"),
        (name = "chat", description = "Dashboard assistant"),
    )
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::HttpBuilder::new()
                    .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                    .bearer_format("Firebase ID token")
                    .build(),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "dashboard_api=debug,dashboard_core=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = match config::AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let project_id = config.firebase_key.project_id.clone();
    let verifier = identity::FirebaseTokenVerifier::new(project_id.as_str(), config.upstream_timeout)
        .expect("Failed to build HTTP client for token verification");
    let tokens = google_auth::AccessTokenSource::new(
        config.firebase_key.clone(),
        google_auth::CLOUD_PLATFORM_SCOPE,
        config.upstream_timeout,
    )
    .expect("FIREBASE_CREDENTIALS private_key is not a valid RSA key");
    let directory = directory::FirebaseUserDirectory::new(tokens, config.upstream_timeout)
        .expect("Failed to build HTTP client for user directory");
    let model = llm::GeminiModel::new(
        config.google_api_key.clone(),
        config.gemini_model.clone(),
        config.gemini_base_url.clone(),
        config.upstream_timeout,
    )
    .expect("Failed to build HTTP client for chat model");

    let alerts = AlertService::new(Arc::new(InMemoryRuleStore::new()));
    let admin_policy = auth::AdminPolicy::new(config.admin_uids.clone());
    if admin_policy.is_open() {
        tracing::warn!("DASHBOARD_ADMIN_UIDS is empty: every verified user may call admin routes");
    }

    if let Some(schedule) = config.scheduler.clone() {
        let scheduler = scheduler::AlertScheduler::new(
            alerts.clone(),
            Arc::new(scheduler::FixedObservations(schedule.observations)),
            schedule.interval,
        );
        tokio::spawn(scheduler.start());
    }

    let app_state = state::AppState {
        alerts,
        verifier: Arc::new(verifier),
        directory: Arc::new(directory),
        chat: Arc::new(chat_relay::ChatRelay::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(model),
        )),
        admin_policy: Arc::new(admin_policy),
        display_tz: config.display_tz,
    };

    let app = app::build_router(
        app_state,
        &app::RouterOptions {
            cors_origins: config.cors_origins.clone(),
            chat_rate_limit: config.chat_rate_limit,
        },
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        %addr,
        project_id = %project_id,
        model = %config.gemini_model,
        display_tz = %config.display_tz,
        "Dashboard API listening"
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listen address");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
