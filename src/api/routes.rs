use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{query, AppState};
use crate::config::Config;
use crate::services::QueryService;

/// Create router with application state
pub fn create_router_with_state(query_service: Arc<QueryService>, config: Config) -> Router {
    let state = AppState {
        config,
        query_service,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/query", post(query::execute_query))
        .route("/api/verify", get(query::verify))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
