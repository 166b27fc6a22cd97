use axum::Router;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;
use crate::{ApiDoc, middleware, routes};

/// Router-level settings that are not part of the shared state.
#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    pub cors_origins: Vec<String>,
    /// Per-IP limit on /chat. Needs connect info, so tests run without it.
    pub chat_rate_limit: bool,
}

pub fn build_router(state: AppState, options: &RouterOptions) -> Router {
    let chat = if options.chat_rate_limit {
        routes::chat::router().layer(middleware::rate_limit::chat_layer())
    } else {
        routes::chat::router()
    };

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::alerts::router())
        .merge(routes::users::router())
        .merge(chat)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer(&options.cors_origins)),
        )
        .with_state(state)
}
