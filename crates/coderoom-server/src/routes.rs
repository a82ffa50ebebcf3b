//! Route definitions for the coderoom API.

use axum::http::HeaderValue;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    if origins.iter().any(|o| o == "*") {
        return Some(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    Some(
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// Build the Axum router with all coderoom routes.
///
/// Routes are available both at `/` and `/v1/`. Health endpoints are always
/// at the root level.
pub fn build_router(state: AppState) -> Router {
    let settings = state.settings().clone();

    let api_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/projects/create", post(handlers::create_project))
        .route("/projects/all", get(handlers::list_projects))
        .route("/projects/get-project/:project_id", get(handlers::get_project))
        .route("/projects/add-user", put(handlers::add_users))
        .route("/projects/update-file-tree", put(handlers::update_file_tree))
        .route("/projects/delete/:project_id", delete(handlers::delete_project))
        .route("/projects/:project_id/messages", get(handlers::list_messages))
        .route("/ai/get-result", get(handlers::ai_result));

    let router = Router::new()
        .route("/health", get(handlers::health))
        .route("/health/live", get(handlers::health_live))
        .route("/health/ready", get(handlers::health_ready))
        .merge(api_routes.clone())
        .nest("/v1", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(settings.request_timeout))
        .layer(RequestBodyLimitLayer::new(settings.body_limit))
        .layer(ConcurrencyLimitLayer::new(settings.concurrency_limit));

    match cors_layer(&settings.cors_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}
