//! HTTP router construction.
//!
//! Assembles all Axum routes and middleware into a single `Router`.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use relay_core::RelayError;

use crate::api;
use crate::state::AppState;

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Result<Router, RelayError> {
    let cors = cors_layer(&state.config.server.cors_origin)?;

    Ok(Router::new()
        .route("/health", get(api::health))
        .route("/api/chat", post(api::chat))
        .route("/api/generate", post(api::generate))
        .route("/api/sse", get(api::sse))
        .route("/api/tools", post(api::tools))
        .route("/api/conversations/{id}/messages", get(api::conversation_messages))
        .layer(cors)
        .with_state(state))
}

/// `*` allows any origin; anything else must be a single valid origin.
fn cors_layer(origin: &str) -> Result<CorsLayer, RelayError> {
    if origin == "*" {
        return Ok(CorsLayer::permissive());
    }
    let value = HeaderValue::from_str(origin)
        .map_err(|e| RelayError::Config(format!("invalid CORS origin '{origin}': {e}")))?;
    Ok(CorsLayer::new()
        .allow_origin(value)
        .allow_methods(Any)
        .allow_headers(Any))
}
